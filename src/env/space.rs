#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceTypeBounds {
    Discrete(usize),
    Image {
        height: usize,
        width: usize,
        channels: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceInfo {
    pub data: Vec<SpaceTypeBounds>,
}

impl SpaceInfo {
    pub fn new(data: Vec<SpaceTypeBounds>) -> Self {
        Self { data }
    }

    pub fn get_discrete_combinations(&self) -> usize {
        let mut value = 1;
        for i in self.data.iter() {
            if let SpaceTypeBounds::Discrete(n) = *i {
                value *= n;
            }
        }
        value
    }

    /// Shape of the first image component, if any.
    pub fn image_shape(&self) -> Option<(usize, usize, usize)> {
        self.data.iter().find_map(|i| match *i {
            SpaceTypeBounds::Image {
                height,
                width,
                channels,
            } => Some((height, width, channels)),
            SpaceTypeBounds::Discrete(_) => None,
        })
    }
}
