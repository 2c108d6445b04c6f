use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use physio_fusion::config::{Cli, Command, PipelineConfig, ProcessArgs};
use physio_fusion::pipeline::{default_processor, fuse_directories, process_directory};
use physio_fusion::{LabelTable, Modality};

fn run_process(args: &ProcessArgs, config: &PipelineConfig) -> Result<()> {
    let modality = config.modality;
    let labels = LabelTable::load(&args.labels)?;
    info!("Loaded {} subject labels from {}", labels.len(), args.labels.display());

    let input_dir = args.input_dir(modality);
    let output_dir = args.output_dir(modality);
    let processor = default_processor(modality);
    let report = process_directory(&input_dir, &output_dir, &labels, processor.as_ref(), config)
        .with_context(|| format!("Failed to process {}", input_dir.display()))?;

    if !report.skipped.is_empty() {
        warn!("{} recordings were skipped", report.skipped.len());
    }
    println!(
        "{}: wrote {} files to {}",
        modality,
        report.written.len(),
        output_dir.display()
    );
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::ProcessEda(args) => run_process(args, &args.pipeline_config(Modality::Eda)?),
        Command::ProcessPpg(args) => run_process(&args.process, &args.pipeline_config()?),
        Command::Fuse(args) => {
            let config = args.fusion_config()?;
            let report = fuse_directories(
                &args.eda_dir,
                &args.ppg_dir,
                &args.output_dir,
                args.timezone()?,
                &config,
            )?;
            println!(
                "Fused {} subjects ({} rows) into {}",
                report.fused_subjects.len(),
                report.rows,
                report.output.display()
            );
            Ok(())
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
