//! HTTP surface — `paperforge serve`.

use anyhow::Result;

use paperforge::config::PaperforgeConfig;
use paperforge::server::{ServerConfig, start_server};

pub async fn cmd_serve(port: u16, config: PaperforgeConfig) -> Result<()> {
    start_server(ServerConfig { port, config }).await
}
