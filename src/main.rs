use clap::{Parser, Subcommand};
use pixelsmith::imaging::{Gravity, RasterImage};
use pixelsmith::pipeline::{self, TransformRequest};
use pixelsmith::{config, metadata, output};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pixelsmith")]
#[command(about = "Crop, reassemble and describe images")]
#[command(long_about = "\
Crop, reassemble and describe images

Images are cover-resized to the requested box and cropped around a gravity:
a named anchor (top-left ... bottom-right, centre) or a focal point given as
fractions of the source (focal-0.3-0.6). Animated GIFs keep every frame; each
frame is cropped on its own and the frames are stacked back together.

Pixel evaluation is canceled once it runs longer than process_timeout seconds.

Set RUST_LOG=debug to trace geometry decisions.

Run 'pixelsmith gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Directory containing config.toml
    #[arg(long, default_value = ".", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the descriptive document of an image
    Info {
        file: PathBuf,
        /// Print the single-line JSON document instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Resize, crop and re-encode an image
    Transform(TransformArgs),
    /// List the enabled output formats
    Savers,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct TransformArgs {
    file: PathBuf,
    /// Target width in pixels
    #[arg(short, long)]
    width: Option<u32>,
    /// Target height in pixels
    #[arg(short = 'H', long)]
    height: Option<u32>,
    /// Crop gravity (anchor name or focal-X-Y); defaults to config
    #[arg(short, long)]
    gravity: Option<Gravity>,
    /// Output format (jpg, png, webp, avif, tiff, gif, json); defaults to the source format
    #[arg(short, long)]
    format: Option<String>,
    /// Rotate by 90, 180 or 270 degrees first
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    rotate: i32,
    /// Output file; defaults to <stem>-<w>x<h>.<ext> beside the input
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Info { file, json } => {
            let img = RasterImage::from_file(&file)?;
            let image_type = pipeline::source_type(&img);
            if json {
                println!("{}", metadata::image_to_json(&img, image_type)?);
            } else {
                output::print_info_output(&metadata::describe(&img, image_type), &file);
            }
        }
        Command::Transform(args) => {
            let mut request = TransformRequest {
                width: args.width,
                height: args.height,
                gravity: args.gravity,
                format: None,
                rotate: args.rotate,
            };
            if let Some(name) = &args.format {
                request = request.with_format_name(name)?;
            }
            let result = pipeline::transform_file(&args.file, &request, &cli.config)?;
            let dest = args
                .output
                .unwrap_or_else(|| default_destination(&args.file, &result));
            std::fs::write(&dest, &result.bytes)?;
            output::print_transform_output(&result, &args.file, &dest);
        }
        Command::Savers => {
            let config = config::load_config(&cli.config)?;
            for line in output::format_savers_output(config.saver_mask()) {
                println!("{}", line);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// `<stem>-<width>x<height><ext>` beside the input, with height per page.
fn default_destination(input: &Path, result: &pipeline::Transformed) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let page_height = result.height / result.pages.max(1);
    input.with_file_name(format!(
        "{stem}-{}x{page_height}{}",
        result.width,
        pixelsmith::format::determine_image_extension(result.output)
    ))
}
