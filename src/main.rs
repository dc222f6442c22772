use clap::Parser;
use log::info;
use npom_df::{
    archive::{
        discovery::{find_archive, latest_output, output_path, DATE_PATTERN},
        InputArchive,
    },
    batch::{run_statistics, BatchContext, BatchOptions, CancelToken},
    console::{show_intro, Args, PartialArgs},
    error::DfResult,
    observer::LogObserver,
    summary::SummaryWriter,
};

fn run_batch(args: &Args) -> DfResult<()> {
    let input_path = find_archive(&args.directory, DATE_PATTERN, !args.oldest)?;
    let output = output_path(&args.directory);
    info!("reading {}", input_path.display());
    let input = InputArchive::open(&input_path)?;
    let writer = SummaryWriter::create(&output)?;
    info!("writing {}", output.display());
    let context = BatchContext::new(input, writer, args.config.clone())?
        .with_observer(Box::new(LogObserver::new(args.config.histogram.min_bin_factor)));
    let options = BatchOptions {
        first: args.first,
        last: args.last,
        raise_exceptions: args.raise_exceptions,
        histogram_groups: args.npom_types.clone(),
        ..BatchOptions::default()
    };
    let report = context.run(&options)?;
    println!(
        "{} spectra analysed ({} NPoMs), output written to {}",
        report.processed,
        report.npoms,
        output.display()
    );
    Ok(())
}

fn run_stats_only(args: &Args) -> DfResult<()> {
    let path = latest_output(&args.directory)?;
    info!("rebuilding histograms of {}", path.display());
    let writer = SummaryWriter::open(&path)?;
    let groups = run_statistics(
        &writer,
        &args.config,
        &args.npom_types,
        &LogObserver::new(args.config.histogram.min_bin_factor),
        &CancelToken::new(),
        args.raise_exceptions,
    )?;
    println!("{} histograms written to {}", groups.len(), path.display());
    Ok(())
}

fn main() -> DfResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    //parse CLI arguments
    let args = Args::try_from(PartialArgs::parse())?;
    show_intro();
    if args.stats_only {
        run_stats_only(&args)
    } else {
        run_batch(&args)
    }
}
