//! Diff command handler.
//!
//! Compares a release's rendered manifests with the live cluster and prints
//! one annotated YAML diff per resource. Manifests come from the release's
//! Helm storage, or from a file or stdin.

use std::{
	fmt,
	io::{self, IsTerminal, Write},
	path::PathBuf,
	process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::Deserialize;
use tracing::instrument;

use crate::{
	config::KdriftConfig,
	k8s::{
		client::ClusterConnection,
		diff::{DiffEngine, DiffReport, FailurePolicy},
		locate::ResourceLocator,
		normalize::{FieldFilter, FieldPath},
		output::DiffOutput,
		release::HelmReleaseSource,
	},
	manifest,
	source::{FileManifestSource, ManifestSource},
};

/// Exit status for `--detailed-exitcode` when drift was found.
pub const EXIT_DIFFERENCES: u8 = 2;

/// Color settings for diff output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
	/// Color when stdout is a terminal.
	#[default]
	Auto,
	Always,
	Never,
}

impl ColorMode {
	/// Whether output to stdout should be colored.
	pub fn should_colorize(self) -> bool {
		self.should_colorize_on(&io::stdout())
	}

	/// Whether output to `stream` should be colored.
	pub fn should_colorize_on(self, stream: &impl IsTerminal) -> bool {
		match self {
			ColorMode::Auto => stream.is_terminal(),
			ColorMode::Always => true,
			ColorMode::Never => false,
		}
	}
}

impl fmt::Display for ColorMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ColorMode::Auto => write!(f, "auto"),
			ColorMode::Always => write!(f, "always"),
			ColorMode::Never => write!(f, "never"),
		}
	}
}

#[derive(Args, Debug, Default)]
pub struct DiffArgs {
	/// Helm release to diff, read from its storage in the cluster
	pub release: Option<String>,

	/// Rendered manifests to diff instead of a release; `-` reads stdin
	#[arg(short = 'f', long = "file", value_name = "PATH", conflicts_with = "release")]
	pub manifest: Option<PathBuf>,

	/// Namespace of the release. Defaults to the kubeconfig context's namespace
	#[arg(short = 'n', long)]
	pub namespace: Option<String>,

	/// Kubeconfig context to use instead of the current one
	#[arg(long)]
	pub context: Option<String>,

	/// Config file. Defaults to the nearest .kdrift.yaml above the working directory
	#[arg(long)]
	pub config: Option<PathBuf>,

	/// Compare live objects verbatim, including server-managed fields
	#[arg(long)]
	pub keep_common_changes: bool,

	/// JSON pointer of an extra field to ignore, e.g. /metadata/managedFields
	#[arg(long = "ignore-field", value_name = "POINTER")]
	pub ignore_fields: Vec<FieldPath>,

	/// Keep diffing when a resource cannot be found, and fail at the end
	#[arg(long)]
	pub continue_on_error: bool,

	/// Number of cluster lookups to run in parallel
	#[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
	pub concurrency: Option<u16>,

	/// Controls color in diff output
	#[arg(long, value_enum)]
	pub color: Option<ColorMode>,

	/// Print summary of the differences, not the actual contents
	#[arg(short = 's', long)]
	pub summarize: bool,

	/// Exit with 2 when differences are found
	#[arg(long)]
	pub detailed_exitcode: bool,
}

/// Resolved options for a drift run.
#[derive(Debug, Clone)]
pub struct DiffOpts {
	pub filter: FieldFilter,
	pub policy: FailurePolicy,
	pub concurrency: usize,
	pub color: ColorMode,
	pub summarize: bool,
}

impl Default for DiffOpts {
	fn default() -> Self {
		Self {
			filter: FieldFilter::default(),
			policy: FailurePolicy::Abort,
			concurrency: 1,
			color: ColorMode::Auto,
			summarize: false,
		}
	}
}

impl DiffOpts {
	/// Merge command-line flags over the config file.
	pub fn resolve(args: &DiffArgs, config: &KdriftConfig) -> Result<Self> {
		let base = if args.keep_common_changes || config.keep_common_changes {
			FieldFilter::none()
		} else {
			FieldFilter::non_deterministic()
		};

		let configured = config
			.ignore_fields
			.iter()
			.map(|pointer| pointer.parse::<FieldPath>())
			.collect::<Result<Vec<_>, _>>()
			.context("reading ignoreFields from config")?;

		let policy = if args.continue_on_error || config.continue_on_error {
			FailurePolicy::Continue
		} else {
			FailurePolicy::Abort
		};

		Ok(Self {
			filter: base
				.with_paths(configured)
				.with_paths(args.ignore_fields.iter().cloned()),
			policy,
			concurrency: args
				.concurrency
				.map(usize::from)
				.or(config.concurrency)
				.unwrap_or(1)
				.max(1),
			color: args.color.or(config.color).unwrap_or_default(),
			summarize: args.summarize,
		})
	}
}

fn load_config(args: &DiffArgs) -> Result<KdriftConfig> {
	if let Some(path) = &args.config {
		return Ok(KdriftConfig::load_from_file(path)?);
	}
	let cwd = std::env::current_dir().context("resolving working directory")?;
	Ok(KdriftConfig::load_from_directory(&cwd)?.unwrap_or_default())
}

/// Run the diff command.
pub fn run<W: Write>(args: DiffArgs, writer: W) -> Result<ExitCode> {
	let config = load_config(&args)?;
	let opts = DiffOpts::resolve(&args, &config)?;
	let context = args.context.clone().or(config.context);

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;

	let color = opts.color;
	let report = runtime.block_on(async {
		let connection = ClusterConnection::connect(context.as_deref())
			.await
			.context("connecting to Kubernetes cluster")?;

		match &args.release {
			Some(release) => {
				let source = HelmReleaseSource::fetch(&connection, release, args.namespace.as_deref())
					.await
					.with_context(|| format!("getting Helm release {release}"))?;
				diff_release(&source, connection, opts, writer).await
			}
			None => {
				let source = FileManifestSource::new(args.manifest.clone(), args.namespace.clone());
				diff_release(&source, connection, opts, writer).await
			}
		}
	})?;

	if !report.is_complete() {
		let stderr = io::stderr();
		let use_color = color.should_colorize_on(&stderr);
		DiffOutput::with_color(stderr.lock(), use_color).write_failures(&report.failures)?;
	}
	exit_code(&report, args.detailed_exitcode)
}

/// Map a finished run to the process exit status.
///
/// Resources that could not be compared fail the run. Otherwise differences
/// only change the status with `detailed`.
pub fn exit_code(report: &DiffReport, detailed: bool) -> Result<ExitCode> {
	if !report.is_complete() {
		anyhow::bail!(
			"{} resource(s) could not be compared",
			report.failures.len()
		);
	}

	if detailed && report.has_changes() {
		return Ok(ExitCode::from(EXIT_DIFFERENCES));
	}
	Ok(ExitCode::SUCCESS)
}

/// Diff a release against the cluster and write the report.
///
/// The release namespace comes from `source`, falling back to the
/// connection's default namespace.
#[instrument(skip_all)]
pub async fn diff_release<M: ManifestSource, W: Write>(
	source: &M,
	connection: ClusterConnection,
	opts: DiffOpts,
	mut writer: W,
) -> Result<DiffReport> {
	let text = source.manifest_text()?;
	let descriptors = manifest::parse(&text).context("parsing manifests")?;
	if descriptors.is_empty() {
		tracing::warn!("no resources found in manifests");
	}

	let namespace = source
		.namespace()
		.unwrap_or(connection.default_namespace())
		.to_string();
	tracing::debug!(namespace = %namespace, resources = descriptors.len(), "diffing release");

	let engine = DiffEngine::new(ResourceLocator::new(connection.clone(), connection), opts.filter)
		.with_policy(opts.policy)
		.with_concurrency(opts.concurrency);
	let report = engine.diff_all(&descriptors, &namespace).await?;

	let mut output = DiffOutput::new(&mut writer, opts.color);
	if opts.summarize {
		output.write_summary(&report.diffs)?;
	} else {
		for diff in &report.diffs {
			output.write_diff(diff)?;
		}
	}
	output.flush()?;

	Ok(report)
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use tempfile::tempfile;

	use super::*;
	use crate::k8s::{
		diff::{ResourceDiff, ResourceFailure},
		locate::LocateError,
		normalize::NON_DETERMINISTIC_FIELDS,
		render::{AnnotatedLine, LineChange},
	};

	fn report(changed: bool, failed: bool) -> DiffReport {
		let change = if changed {
			LineChange::Added
		} else {
			LineChange::Unchanged
		};
		let failures = failed
			.then(|| ResourceFailure {
				index: 1,
				kind: "ConfigMap".to_string(),
				name: "foo".to_string(),
				error: LocateError::NotFound {
					kind: "ConfigMap".to_string(),
					name: "foo".to_string(),
					namespace: Some("default".to_string()),
				},
			})
			.into_iter()
			.collect();

		DiffReport {
			diffs: vec![ResourceDiff {
				index: 0,
				kind: "Deployment".to_string(),
				name: "web".to_string(),
				lines: vec![AnnotatedLine {
					change,
					text: "  replicas: 5".to_string(),
				}],
			}],
			failures,
		}
	}

	#[test]
	fn test_color_mode_always() {
		assert!(ColorMode::Always.should_colorize());
	}

	#[test]
	fn test_color_mode_never() {
		assert!(!ColorMode::Never.should_colorize());
	}

	#[test]
	fn test_color_follows_the_written_stream() {
		let file = tempfile().unwrap();
		assert!(!ColorMode::Auto.should_colorize_on(&file));
		assert!(ColorMode::Always.should_colorize_on(&file));
		assert!(!ColorMode::Never.should_colorize_on(&file));
	}

	#[rstest]
	#[case::unchanged(false, false, ExitCode::SUCCESS)]
	#[case::unchanged_detailed(false, true, ExitCode::SUCCESS)]
	#[case::changed(true, false, ExitCode::SUCCESS)]
	#[case::changed_detailed(true, true, ExitCode::from(EXIT_DIFFERENCES))]
	fn test_exit_code(#[case] changed: bool, #[case] detailed: bool, #[case] expected: ExitCode) {
		assert_eq!(exit_code(&report(changed, false), detailed).unwrap(), expected);
	}

	#[rstest]
	#[case(false)]
	#[case(true)]
	fn test_exit_code_with_failures_is_error(#[case] detailed: bool) {
		let err = exit_code(&report(true, true), detailed).unwrap_err();
		assert_eq!(err.to_string(), "1 resource(s) could not be compared");
	}

	#[test]
	fn test_release_and_file_conflict() {
		use clap::Parser;

		#[derive(Parser)]
		struct Cli {
			#[command(flatten)]
			diff: DiffArgs,
		}

		let release = Cli::try_parse_from(["kdrift", "shop", "-n", "retail"]).unwrap();
		assert_eq!(release.diff.release.as_deref(), Some("shop"));
		assert_eq!(release.diff.manifest, None);

		let file = Cli::try_parse_from(["kdrift", "-f", "-"]).unwrap();
		assert_eq!(file.diff.release, None);
		assert_eq!(file.diff.manifest, Some(PathBuf::from("-")));

		assert!(Cli::try_parse_from(["kdrift", "shop", "-f", "rendered.yaml"]).is_err());
	}

	#[test]
	fn test_resolve_defaults() {
		let opts = DiffOpts::resolve(&DiffArgs::default(), &KdriftConfig::default()).unwrap();
		assert_eq!(opts.filter, FieldFilter::non_deterministic());
		assert_eq!(opts.policy, FailurePolicy::Abort);
		assert_eq!(opts.concurrency, 1);
		assert_eq!(opts.color, ColorMode::Auto);
	}

	#[test]
	fn test_resolve_flags_beat_config() {
		let args = DiffArgs {
			concurrency: Some(2),
			color: Some(ColorMode::Always),
			ignore_fields: vec!["/metadata/managedFields".parse().unwrap()],
			..DiffArgs::default()
		};
		let config = KdriftConfig {
			concurrency: Some(8),
			color: Some(ColorMode::Never),
			continue_on_error: true,
			ignore_fields: vec!["/metadata/labels".to_string()],
			..KdriftConfig::default()
		};

		let opts = DiffOpts::resolve(&args, &config).unwrap();
		assert_eq!(opts.concurrency, 2);
		assert_eq!(opts.color, ColorMode::Always);
		assert_eq!(opts.policy, FailurePolicy::Continue);

		let extra: Vec<_> = opts.filter.paths()[NON_DETERMINISTIC_FIELDS.len()..]
			.iter()
			.map(ToString::to_string)
			.collect();
		assert_eq!(extra, vec!["/metadata/labels", "/metadata/managedFields"]);
	}

	#[rstest]
	#[case(true, false)]
	#[case(false, true)]
	fn test_keep_common_changes_keeps_ignored_fields(#[case] flag: bool, #[case] in_config: bool) {
		let args = DiffArgs {
			keep_common_changes: flag,
			ignore_fields: vec!["/metadata/managedFields".parse().unwrap()],
			..DiffArgs::default()
		};
		let config = KdriftConfig {
			keep_common_changes: in_config,
			..KdriftConfig::default()
		};

		let opts = DiffOpts::resolve(&args, &config).unwrap();
		let paths: Vec<_> = opts.filter.paths().iter().map(ToString::to_string).collect();
		assert_eq!(paths, vec!["/metadata/managedFields"]);
	}

	#[test]
	fn test_resolve_rejects_bad_config_pointer() {
		let config = KdriftConfig {
			ignore_fields: vec!["metadata.labels".to_string()],
			..KdriftConfig::default()
		};
		assert!(DiffOpts::resolve(&DiffArgs::default(), &config).is_err());
	}
}
