pub mod ai;
pub mod board;
pub mod config;
pub mod error;
pub mod types;

pub use ai::EngineClient;
pub use config::EngineConfig;
pub use error::{ClientError, ClientResult};
pub use types::{Board, Cell, MoveEvaluation, Player, Position};
