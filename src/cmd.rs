use crate::chromeos_update_engine::PartitionUpdate;
use crate::extract::{ExtractedImage, Extractor, create_output_dir};
use crate::payload::Payload;
use anyhow::{Context, Result};
use clap::{Parser, ValueHint};
use console::Style;
use indicatif::{
    HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressFinish, ProgressStyle,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

const PAYLOAD_READ_BUFFER: usize = 256 * 1024; // 256 KiB keeps codec refills cheap
const PROGRESS_UPDATE_FREQUENCY: u8 = 4; // Hz

#[derive(Debug, Parser)]
#[clap(
    about,
    author,
    disable_help_subcommand = true,
    help_template = HELP_TEMPLATE,
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cmd {
    /// Full OTA payload.bin
    #[clap(value_hint = ValueHint::FilePath, value_name = "PAYLOAD")]
    payload: PathBuf,

    /// Directory to create for the partition images; must not exist yet
    #[clap(
        value_hint = ValueHint::DirPath,
        value_name = "OUTPUT_DIR",
        default_value = "output"
    )]
    output_dir: PathBuf,
}

impl Cmd {
    pub fn run(&self) -> Result<()> {
        let file = File::open(&self.payload)
            .with_context(|| format!("unable to open file for reading: {:?}", self.payload))?;
        let mut source = BufReader::with_capacity(PAYLOAD_READ_BUFFER, file);

        let payload = Payload::read_from(&mut source)
            .with_context(|| format!("unable to read payload: {:?}", self.payload))?;

        self.print_partitions(&payload.manifest.partitions);

        create_output_dir(&self.output_dir)
            .with_context(|| format!("unable to create output directory {:?}", self.output_dir))?;

        let style = ProgressStyle::with_template(
            "{prefix:>16!.green.bold} [{wide_bar:.white.dim}] {percent:>3.white}%",
        )
        .context("unable to build progress bar template")?
        .progress_chars("=> ");
        let multiprogress = MultiProgress::with_draw_target(ProgressDrawTarget::stderr_with_hz(
            PROGRESS_UPDATE_FREQUENCY,
        ));

        let images = Extractor::new(&mut source, payload.context)
            .extract_all(
                &payload.manifest.partitions,
                &self.output_dir,
                |update| multiprogress.add(create_progress_bar(update, &style)),
            )
            .with_context(|| {
                format!(
                    "extraction into {} aborted; images written so far were left in place",
                    self.output_dir.display()
                )
            })?;

        self.display_summary(&self.output_dir, &images);
        Ok(())
    }

    fn print_partitions(&self, partitions: &[PartitionUpdate]) {
        let bold_green = Style::new().bold().green();
        println!("Partitions found: {}", partitions.len());
        for partition in partitions {
            let size = partition
                .new_partition_info
                .as_ref()
                .and_then(|info| info.size)
                .map(|size| HumanBytes(size).to_string());
            let size = size.as_deref().unwrap_or("???");
            println!("  {} ({size})", bold_green.apply_to(&partition.partition_name));
        }
        println!();
    }

    fn display_summary(&self, partition_dir: &Path, images: &[ExtractedImage]) {
        let total_size: u64 = images.iter().map(|image| image.size).sum();

        println!("\nExtraction completed successfully!");
        println!("Output directory: {}", partition_dir.display());
        println!(
            "Extracted {} partition image(s), total size: {}",
            images.len(),
            HumanBytes(total_size)
        );
    }
}

fn create_progress_bar(update: &PartitionUpdate, style: &ProgressStyle) -> ProgressBar {
    ProgressBar::new(update.operations.len() as u64)
        .with_finish(ProgressFinish::AndLeave)
        .with_prefix(update.partition_name.clone())
        .with_style(style.clone())
}

const HELP_TEMPLATE: &str = color_print::cstr!(
    "\
{before-help}<bold><underline>{name} {version}</underline></bold>
{about}

Rebuilds one PARTITION.img file per partition of a full OTA payload.bin.
Incremental (delta) payloads are rejected.

Examples:
    payload-extract payload.bin
    payload-extract payload.bin images

Notes:
  - The output directory must not exist; it is created by the run.
  - On error, extraction stops and images written so far are kept as-is.
  - Set RUST_LOG=debug (or trace) for detailed logs.

{usage-heading}
{usage}

Arguments:
{all-args}{after-help}"
);
