pub mod toml_config;

pub use toml_config::TomlConfig;

#[cfg(feature = "cli")]
pub use cli::CliConfig;

#[cfg(feature = "cli")]
mod cli {
    use clap::Parser;

    /// Thin CLI surface: everything of substance lives in the TOML config;
    /// these flags select the run.
    #[derive(Debug, Clone, Parser)]
    #[command(name = "tube-etl")]
    #[command(about = "Channel and video metrics extraction-and-load pipeline")]
    pub struct CliConfig {
        #[arg(long, default_value = "config/pipeline.toml")]
        pub config: String,

        /// Channel ids to track, overriding the configured set.
        #[arg(long, value_delimiter = ',')]
        pub channel_ids: Vec<String>,

        /// Video ids to track, overriding the configured set.
        #[arg(long, value_delimiter = ',')]
        pub video_ids: Vec<String>,

        /// Logical observation date (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        pub observation_date: Option<String>,

        /// Bypass the response cache for this run.
        #[arg(long)]
        pub full_refresh: bool,

        #[arg(long, help = "Enable verbose output")]
        pub verbose: bool,

        #[arg(long, help = "Log process resource stats between stages")]
        pub monitor: bool,
    }
}
