use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kdrift::{commands, commands::util::BrokenPipeGuard, telemetry};

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

#[derive(Parser)]
#[command(name = "kdrift")]
#[command(about = "Show drift between a release's manifests and the live cluster", long_about = None)]
#[command(version = env!("KDRIFT_VERSION"))]
struct Cli {
	/// Log level (possible values: error, warn, info, debug, trace). Overrides RUST_LOG
	#[arg(long, global = true)]
	log_level: Option<tracing::Level>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Differences between the release manifests and the cluster
	Diff(commands::diff::DiffArgs),
}

fn main() -> ExitCode {
	let cli = Cli::parse();

	let _telemetry = match telemetry::init(cli.log_level) {
		Ok(guard) => guard,
		Err(e) => {
			eprintln!("Error: {e:#}");
			return ExitCode::FAILURE;
		}
	};

	let stdout = BrokenPipeGuard::new(std::io::stdout());

	let result = match cli.command {
		Commands::Diff(args) => commands::diff::run(args, stdout),
	};

	match result {
		Ok(code) => code,
		Err(e) => {
			tracing::debug!(error = ?e, "command failed");
			eprintln!("Error: {e:#}");
			ExitCode::FAILURE
		}
	}
}
