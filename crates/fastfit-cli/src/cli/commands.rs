use super::CliError;
use super::helpers::{load_axis, load_stack, render_human_summary, write_output};
use fastfit_core::common::FitConfiguration;
use fastfit_core::domain::WeightPolicy;
use fastfit_core::modules::{
    BatchLinearFitter, FastFitRequest, FitterOptions, GaussianPeakModel, TabulatedConverter,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(clap::Args)]
pub(super) struct FitArgs {
    /// Fit configuration (JSON)
    #[arg(long)]
    config: PathBuf,

    /// Spectral stack (JSON with shape, data and optional mcaIndex)
    #[arg(long)]
    stack: PathBuf,

    /// Energy or channel axis (JSON array), defaults to channel indices
    #[arg(long)]
    x: Option<PathBuf>,

    /// Lower fit window bound in x units
    #[arg(long, allow_negative_numbers = true)]
    xmin: Option<f64>,

    /// Upper fit window bound in x units
    #[arg(long, allow_negative_numbers = true)]
    xmax: Option<f64>,

    /// Weight selector: 0 none, 1 average spectrum, 2 individual spectra
    #[arg(long, value_parser = clap::value_parser!(i64).range(0..=2))]
    weight: Option<i64>,

    /// Refit pixels whose coefficients come out negative
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    refit: bool,

    /// Append mass-fraction maps to the output
    #[arg(long)]
    concentrations: bool,

    /// Spectra solved per block
    #[arg(long)]
    chunk_width: Option<usize>,

    /// JSON output path; printed to stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,

    /// Report phase timings and refinement passes
    #[arg(long)]
    verbose: bool,
}

pub(super) fn run_fit_command(args: FitArgs) -> Result<i32, CliError> {
    init_tracing(args.verbose);

    let mut options = FitterOptions {
        verbose: args.verbose,
        ..FitterOptions::default()
    };
    if let Some(chunk_width) = args.chunk_width {
        if chunk_width == 0 {
            return Err(CliError::Usage(
                "--chunk-width must be at least 1".to_string(),
            ));
        }
        options.chunk_width = chunk_width;
    }

    let stack = load_stack(&args.stack)?;
    let axis = args.x.as_deref().map(load_axis).transpose()?;

    let mut fitter = BatchLinearFitter::new(GaussianPeakModel::new(FitConfiguration::default())?)
        .with_options(options)
        .with_converter(TabulatedConverter);
    fitter.set_fit_configuration_file(&args.config)?;

    let mut request = FastFitRequest::new(stack.input())
        .with_window(args.xmin, args.xmax)
        .with_concentrations(args.concentrations)
        .with_refit(args.refit);
    if let Some(axis) = axis.as_deref() {
        request = request.with_x(axis);
    }
    if let Some(selector) = args.weight {
        request = request.with_weight(WeightPolicy::from_selector(selector)?);
    }

    let output = fitter.fit_multiple_spectra(request)?;
    info!(
        passes = output.refit_passes,
        forced_zero = output.forced_zero.len(),
        "fit finished"
    );

    match &args.output {
        Some(path) => {
            write_output(path, &output)?;
            println!("{}", render_human_summary(&output, Some(path)));
        }
        None => {
            let rendered = serde_json::to_string_pretty(&output)
                .map_err(|error| CliError::Internal(error.into()))?;
            println!("{rendered}");
        }
    }
    Ok(0)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
