use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "disklog")]
#[command(about = "DiskLog - collects framed log records over TCP into per-log files")]
#[command(version)]
pub struct Args {
    /// Interface to bind; empty binds all interfaces
    #[arg(short, long, default_value = "")]
    pub endpoint: String,

    /// Listen port; 0 selects the default port 6801
    #[arg(short, long, default_value = "6801")]
    pub port: u16,

    /// Directory receiving the `<log name>.log` files
    #[arg(short, long, default_value = "./logs")]
    pub data_dir: PathBuf,

    /// TOML or JSON config file; overrides the flags above
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
