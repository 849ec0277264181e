//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `generate` | `Generate`       |
//! | `heal`     | `Heal`           |
//! | `serve`    | `Serve`          |

pub mod generate;
pub mod heal;
pub mod serve;

pub use generate::cmd_generate;
pub use heal::cmd_heal;
pub use serve::cmd_serve;
