// Core models
pub mod period;
pub mod leaderboard;
pub mod distribution;
pub mod revenue;

// Re-export commonly used types
pub use period::*;
pub use leaderboard::*;
pub use distribution::*;
pub use revenue::*;
