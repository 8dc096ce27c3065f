use ndarray::{s, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::env::space::{SpaceInfo, SpaceTypeBounds};
use crate::env::{Env, EnvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakoutAction {
    Noop,
    Fire,
    Right,
    Left,
}

impl BreakoutAction {
    pub const RANGE: usize = 4;
}

impl TryFrom<usize> for BreakoutAction {
    type Error = EnvError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Noop),
            1 => Ok(Self::Fire),
            2 => Ok(Self::Right),
            3 => Ok(Self::Left),
            _ => Err(EnvError::InvalidAction(value)),
        }
    }
}

impl From<BreakoutAction> for usize {
    fn from(action: BreakoutAction) -> Self {
        match action {
            BreakoutAction::Noop => 0,
            BreakoutAction::Fire => 1,
            BreakoutAction::Right => 2,
            BreakoutAction::Left => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakoutObservation {
    pub frame: Array3<u8>,
    pub lives: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Ball {
    x: f32,
    y: f32,
    dx: f32,
    dy: f32,
}

type Rgb = [u8; 3];

const BRICK_ROWS: usize = 6;
const BRICK_COLS: usize = 18;

/// Atari-like Breakout: five lives, six rows of bricks, a paddle that moves
/// left or right and a ball that is served with FIRE.
#[derive(Debug, Clone)]
pub struct BreakoutEnv {
    ready: bool,
    lives: u8,
    score: u32,
    bricks: [[bool; BRICK_COLS]; BRICK_ROWS],
    paddle_x: f32,
    ball: Option<Ball>,
    last_action: BreakoutAction,
    frame_skip: (usize, usize),
    repeat_action_probability: f64,
    rng: StdRng,
}

impl BreakoutEnv {
    pub const SCREEN_HEIGHT: usize = 210;
    pub const SCREEN_WIDTH: usize = 160;
    pub const START_LIVES: u8 = 5;

    const WALL_TOP: usize = 17;
    const PLAYFIELD_TOP: usize = 32;
    const PLAYFIELD_LEFT: usize = 8;
    const PLAYFIELD_RIGHT: usize = 152;
    const PLAYFIELD_BOTTOM: usize = 196;
    const BRICK_TOP: usize = 57;
    const BRICK_HEIGHT: usize = 6;
    const BRICK_WIDTH: usize = 8;
    const BRICK_VALUES: [u32; 6] = [7, 7, 4, 4, 1, 1];
    const PADDLE_Y: usize = 189;
    const PADDLE_HEIGHT: usize = 4;
    const PADDLE_WIDTH: usize = 16;
    const PADDLE_SPEED: f32 = 3.0;
    const BALL_WIDTH: usize = 2;
    const BALL_HEIGHT: usize = 4;
    const BALL_SPEED: f32 = 2.0;
    const FAST_BALL_SPEED: f32 = 3.0;
    const SERVE_Y: f32 = 100.0;

    const WALL_COLOR: Rgb = [142, 142, 142];
    const PADDLE_COLOR: Rgb = [200, 72, 72];
    const BRICK_COLORS: [Rgb; 6] = [
        [200, 72, 72],
        [198, 108, 58],
        [180, 122, 48],
        [162, 162, 42],
        [72, 160, 72],
        [66, 72, 200],
    ];
    // a, b, c, d, e, f, g from the least significant bit
    const DIGIT_SEGMENTS: [u8; 10] = [0x3F, 0x06, 0x5B, 0x4F, 0x66, 0x6D, 0x7D, 0x07, 0x7F, 0x6F];

    pub fn new(seed: u64) -> Self {
        Self::with_dynamics(seed, (2, 5), 0.25)
    }

    /// `frame_skip` is the half-open range the number of emulated frames per
    /// step is drawn from.
    pub fn with_dynamics(
        seed: u64,
        frame_skip: (usize, usize),
        repeat_action_probability: f64,
    ) -> Self {
        let lo = frame_skip.0.max(1);
        let hi = frame_skip.1.max(lo + 1);
        Self {
            ready: false,
            lives: Self::START_LIVES,
            score: 0,
            bricks: [[true; BRICK_COLS]; BRICK_ROWS],
            paddle_x: Self::paddle_center(),
            ball: None,
            last_action: BreakoutAction::Noop,
            frame_skip: (lo, hi),
            repeat_action_probability,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn lives(&self) -> u8 {
        self.lives
    }

    pub fn bricks_left(&self) -> usize {
        self.bricks.iter().flatten().filter(|b| **b).count()
    }

    fn paddle_center() -> f32 {
        ((Self::PLAYFIELD_LEFT + Self::PLAYFIELD_RIGHT - Self::PADDLE_WIDTH) / 2) as f32
    }

    fn observation(&self) -> BreakoutObservation {
        BreakoutObservation {
            frame: self.render(),
            lives: self.lives,
        }
    }

    fn serve(&mut self) {
        let max_x = (Self::PLAYFIELD_RIGHT - Self::BALL_WIDTH) as f32;
        let x = self.rng.gen_range(Self::PLAYFIELD_LEFT as f32..max_x);
        let dx = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        self.ball = Some(Ball {
            x,
            y: Self::SERVE_Y,
            dx,
            dy: Self::BALL_SPEED,
        });
    }

    fn move_paddle(&mut self, action: BreakoutAction) {
        let delta = match action {
            BreakoutAction::Right => Self::PADDLE_SPEED,
            BreakoutAction::Left => -Self::PADDLE_SPEED,
            BreakoutAction::Noop | BreakoutAction::Fire => 0.0,
        };
        let max_x = (Self::PLAYFIELD_RIGHT - Self::PADDLE_WIDTH) as f32;
        self.paddle_x = (self.paddle_x + delta).clamp(Self::PLAYFIELD_LEFT as f32, max_x);
    }

    /// Index of the first brick overlapping the ball, if any.
    fn hit_brick(&self, ball: &Ball) -> Option<(usize, usize)> {
        let left = ball.x;
        let right = ball.x + Self::BALL_WIDTH as f32;
        let top = ball.y;
        let bottom = ball.y + Self::BALL_HEIGHT as f32;
        for (row, bricks) in self.bricks.iter().enumerate() {
            let b_top = (Self::BRICK_TOP + row * Self::BRICK_HEIGHT) as f32;
            let b_bottom = b_top + Self::BRICK_HEIGHT as f32;
            if bottom <= b_top || top >= b_bottom {
                continue;
            }
            for (col, alive) in bricks.iter().enumerate() {
                let b_left = (Self::PLAYFIELD_LEFT + col * Self::BRICK_WIDTH) as f32;
                let b_right = b_left + Self::BRICK_WIDTH as f32;
                if *alive && right > b_left && left < b_right {
                    return Some((row, col));
                }
            }
        }
        None
    }

    /// Advances the game by one emulated frame, returning the reward gained.
    fn tick(&mut self, action: BreakoutAction) -> u32 {
        self.move_paddle(action);
        if action == BreakoutAction::Fire && self.ball.is_none() {
            self.serve();
        }
        let mut ball = match self.ball {
            Some(ball) => ball,
            None => return 0,
        };
        let mut reward = 0;

        ball.x += ball.dx;
        ball.y += ball.dy;

        let left = Self::PLAYFIELD_LEFT as f32;
        let right = (Self::PLAYFIELD_RIGHT - Self::BALL_WIDTH) as f32;
        if ball.x < left {
            ball.x = left;
            ball.dx = ball.dx.abs();
        } else if ball.x > right {
            ball.x = right;
            ball.dx = -ball.dx.abs();
        }
        if ball.y < Self::PLAYFIELD_TOP as f32 {
            ball.y = Self::PLAYFIELD_TOP as f32;
            ball.dy = ball.dy.abs();
        }

        if let Some((row, col)) = self.hit_brick(&ball) {
            self.bricks[row][col] = false;
            reward += Self::BRICK_VALUES[row];
            let speed = if row < 2 {
                ball.dy.abs().max(Self::FAST_BALL_SPEED)
            } else {
                ball.dy.abs()
            };
            ball.dy = -ball.dy.signum() * speed;
            if self.bricks_left() == 0 {
                self.bricks = [[true; BRICK_COLS]; BRICK_ROWS];
            }
        }

        let paddle_top = Self::PADDLE_Y as f32;
        let ball_bottom = ball.y + Self::BALL_HEIGHT as f32;
        let overlaps_paddle = ball_bottom > paddle_top
            && ball.y < paddle_top + Self::PADDLE_HEIGHT as f32
            && ball.x + Self::BALL_WIDTH as f32 > self.paddle_x
            && ball.x < self.paddle_x + Self::PADDLE_WIDTH as f32;
        if ball.dy > 0.0 && overlaps_paddle {
            ball.y = paddle_top - Self::BALL_HEIGHT as f32;
            ball.dy = -ball.dy.abs();
            let half = Self::PADDLE_WIDTH as f32 / 2.0;
            let offset = ((ball.x + Self::BALL_WIDTH as f32 / 2.0) - (self.paddle_x + half)) / half;
            let dx = 2.0 * offset.clamp(-1.0, 1.0);
            ball.dx = if dx.abs() < 0.5 {
                0.5 * if dx == 0.0 { ball.dx.signum() } else { dx.signum() }
            } else {
                dx
            };
        }

        if ball.y >= Self::PLAYFIELD_BOTTOM as f32 {
            self.ball = None;
            self.lives = self.lives.saturating_sub(1);
            if self.lives == 0 {
                self.ready = false;
            }
        } else {
            self.ball = Some(ball);
        }
        self.score += reward;
        reward
    }

    fn fill_rect(
        frame: &mut Array3<u8>,
        top: usize,
        left: usize,
        height: usize,
        width: usize,
        color: Rgb,
    ) {
        let bottom = (top + height).min(Self::SCREEN_HEIGHT);
        let right = (left + width).min(Self::SCREEN_WIDTH);
        if top >= bottom || left >= right {
            return;
        }
        for (channel, value) in color.iter().enumerate() {
            frame
                .slice_mut(s![top..bottom, left..right, channel])
                .fill(*value);
        }
    }

    fn draw_digit(frame: &mut Array3<u8>, top: usize, left: usize, digit: usize) {
        let segments = Self::DIGIT_SEGMENTS[digit % 10];
        let rects: [(usize, usize, usize, usize); 7] = [
            (0, 0, 2, 6),
            (0, 4, 5, 2),
            (5, 4, 5, 2),
            (8, 0, 2, 6),
            (5, 0, 5, 2),
            (0, 0, 5, 2),
            (4, 0, 2, 6),
        ];
        for (i, (dy, dx, h, w)) in rects.iter().enumerate() {
            if segments & (1 << i) != 0 {
                Self::fill_rect(frame, top + dy, left + dx, *h, *w, Self::WALL_COLOR);
            }
        }
    }

    fn draw_number(frame: &mut Array3<u8>, left: usize, value: u32, digits: usize) {
        let mut value = value as usize;
        for i in (0..digits).rev() {
            Self::draw_digit(frame, 5, left + i * 8, value % 10);
            value /= 10;
        }
    }
}

impl Default for BreakoutEnv {
    fn default() -> Self {
        Self::new(42)
    }
}

impl Env<BreakoutObservation, BreakoutAction> for BreakoutEnv {
    fn reset(&mut self) -> BreakoutObservation {
        self.ready = true;
        self.lives = Self::START_LIVES;
        self.score = 0;
        self.bricks = [[true; BRICK_COLS]; BRICK_ROWS];
        self.paddle_x = Self::paddle_center();
        self.ball = None;
        self.last_action = BreakoutAction::Noop;
        self.observation()
    }

    fn step(
        &mut self,
        action: BreakoutAction,
    ) -> Result<(BreakoutObservation, f64, bool), EnvError> {
        if !self.ready {
            return Err(EnvError::EnvNotReady);
        }
        let action = if self.rng.gen::<f64>() < self.repeat_action_probability {
            self.last_action
        } else {
            action
        };
        self.last_action = action;

        let frames = self.rng.gen_range(self.frame_skip.0..self.frame_skip.1);
        let mut reward = 0;
        for _ in 0..frames {
            reward += self.tick(action);
            if !self.ready {
                break;
            }
        }
        let terminated = !self.ready;
        Ok((self.observation(), reward as f64, terminated))
    }

    fn render(&self) -> Array3<u8> {
        let mut frame = Array3::zeros((Self::SCREEN_HEIGHT, Self::SCREEN_WIDTH, 3));

        Self::draw_number(&mut frame, 36, self.score % 1000, 3);
        Self::draw_number(&mut frame, 100, self.lives as u32, 1);
        Self::draw_number(&mut frame, 128, 1, 1);

        let top = Self::WALL_TOP;
        let wall_height = Self::PLAYFIELD_TOP - top;
        let side_height = Self::PLAYFIELD_BOTTOM - top;
        let side_width = Self::SCREEN_WIDTH - Self::PLAYFIELD_RIGHT;
        let walls = [
            (0, wall_height, Self::SCREEN_WIDTH),
            (0, side_height, Self::PLAYFIELD_LEFT),
            (Self::PLAYFIELD_RIGHT, side_height, side_width),
        ];
        for (left, height, width) in walls {
            Self::fill_rect(&mut frame, top, left, height, width, Self::WALL_COLOR);
        }

        for (row, bricks) in self.bricks.iter().enumerate() {
            for (col, alive) in bricks.iter().enumerate() {
                if *alive {
                    Self::fill_rect(
                        &mut frame,
                        Self::BRICK_TOP + row * Self::BRICK_HEIGHT,
                        Self::PLAYFIELD_LEFT + col * Self::BRICK_WIDTH,
                        Self::BRICK_HEIGHT,
                        Self::BRICK_WIDTH,
                        Self::BRICK_COLORS[row],
                    );
                }
            }
        }

        Self::fill_rect(
            &mut frame,
            Self::PADDLE_Y,
            self.paddle_x.round() as usize,
            Self::PADDLE_HEIGHT,
            Self::PADDLE_WIDTH,
            Self::PADDLE_COLOR,
        );
        if let Some(ball) = self.ball {
            Self::fill_rect(
                &mut frame,
                ball.y.round().max(0.0) as usize,
                ball.x.round().max(0.0) as usize,
                Self::BALL_HEIGHT,
                Self::BALL_WIDTH,
                Self::PADDLE_COLOR,
            );
        }
        frame
    }

    fn observation_space(&self) -> SpaceInfo {
        SpaceInfo::new(vec![SpaceTypeBounds::Image {
            height: Self::SCREEN_HEIGHT,
            width: Self::SCREEN_WIDTH,
            channels: 3,
        }])
    }

    fn action_space(&self) -> SpaceInfo {
        SpaceInfo::new(vec![SpaceTypeBounds::Discrete(BreakoutAction::RANGE)])
    }
}
