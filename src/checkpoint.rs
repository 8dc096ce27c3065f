use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::network::StateDict;

pub const POLICY_PREFIX: &str = "policy_net";
pub const TARGET_PREFIX: &str = "target_net";

/// `<dir>/<prefix>_<episode>.json`
pub fn checkpoint_path(dir: &Path, prefix: &str, episode: u64) -> PathBuf {
    dir.join(format!("{}_{}.json", prefix, episode))
}

/// Writes every named tensor of a network, in layer order.
pub fn save_state_dict(path: &Path, state: &StateDict) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, state)?;
    writer.flush()?;
    debug!(path = %path.display(), tensors = state.len(), "saved weights");
    Ok(())
}

pub fn load_state_dict(path: &Path) -> Result<StateDict> {
    let reader = BufReader::new(File::open(path)?);
    let state: StateDict = serde_json::from_reader(reader)?;
    debug!(path = %path.display(), tensors = state.len(), "loaded weights");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DqnError;
    use ndarray::{arr1, arr2};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("breakout_dqn_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn path_embeds_episode() {
        let path = checkpoint_path(Path::new("out"), POLICY_PREFIX, 3000);
        assert_eq!(path, Path::new("out").join("policy_net_3000.json"));
    }

    #[test]
    fn keeps_names_order_and_values() {
        let dir = temp_dir("checkpoint");
        let mut state = StateDict::new();
        state.insert("fc.weight".to_string(), arr2(&[[1.5, -2.0], [0.25, 4.0]]).into_dyn());
        state.insert("bn.running_mean".to_string(), arr1(&[0.1]).into_dyn());
        state.insert("fc.bias".to_string(), arr1(&[3.0, -1.0]).into_dyn());

        let path = checkpoint_path(&dir, TARGET_PREFIX, 1000);
        save_state_dict(&path, &state).unwrap();
        let loaded = load_state_dict(&path).unwrap();
        assert_eq!(loaded, state);
        let keys: Vec<&String> = loaded.keys().collect();
        assert_eq!(keys, vec!["fc.weight", "bn.running_mean", "fc.bias"]);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = temp_dir("missing");
        let result = load_state_dict(&dir.join("nothing.json"));
        assert!(matches!(result, Err(DqnError::Io(_))));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
