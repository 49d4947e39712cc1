// Stoic_1_0/src/cli.rs

/// Structure representing command-line arguments.
#[derive(Debug)]
pub struct Args {
    pub config: std::path::PathBuf,
    pub trades: std::path::PathBuf,
    pub baseline: Option<std::path::PathBuf>,
    pub output: Option<std::path::PathBuf>,
}

impl Args {
    /// Parses command-line arguments using `clap`.
    ///
    /// # Errors
    /// * Exits with usage help if required arguments are missing.
    pub fn parse() -> Self {
        let matches = clap::Command::new("Stoic")
            .version("1.0.0")
            .about("Behavior-aware strategy parameter optimizer")
            .arg(
                clap::Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the settings.json configuration file")
                .required(true)
                .num_args(1),
            )
            .arg(
                clap::Arg::new("trades")
                .short('t')
                .long("trades")
                .help("CSV file with the historical trades (timestamp,entry_price,exit_price,quantity,pnl,side)")
                .required(true)
                .num_args(1),
            )
            .arg(
                clap::Arg::new("baseline")
                .short('b')
                .long("baseline")
                .help("JSON file with baseline performance metrics; defaults to metrics of the raw trades")
                .num_args(1),
            )
            .arg(
                clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("Directory for the result, report and evaluation log")
                .num_args(1),
            )
            .get_matches();

        Args {
            config: matches.get_one::<String>("config").cloned().unwrap_or_default().into(),
            trades: matches.get_one::<String>("trades").cloned().unwrap_or_default().into(),
            baseline: matches.get_one::<String>("baseline").map(std::path::PathBuf::from),
            output: matches.get_one::<String>("output").map(std::path::PathBuf::from),
        }
    }
}
