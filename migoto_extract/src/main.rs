use std::path::Path;

use anyhow::Context;
use clap::Parser;
use log::info;
use migoto_model::{
    config::Configuration,
    output::{ObjectData, TextureFilter},
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// The frame analysis folder containing log.txt.
    input: String,
    /// The output folder for the extracted objects.
    /// Each object is saved in a folder named after its vertex buffer hash.
    output: String,

    /// Skip textures smaller than this size in KiB.
    #[arg(long, default_value_t = 0)]
    min_texture_size: u64,

    /// Skip textures with the jpg extension.
    #[arg(long)]
    skip_jpg: bool,

    /// Skip textures bound to the same slot with the same hash in every component.
    #[arg(long)]
    skip_same_slot_hash: bool,

    /// Log extraction progress.
    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Ignore most logs to avoid flooding the console.
    let level = if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };
    simple_logger::SimpleLogger::new().with_level(level).init()?;

    let texture_filter = TextureFilter {
        min_file_size: cli.min_texture_size * 1024,
        exclude_extensions: if cli.skip_jpg {
            vec!["jpg".to_string()]
        } else {
            Vec::new()
        },
        exclude_same_slot_hash_textures: cli.skip_same_slot_hash,
    };

    let start = std::time::Instant::now();

    let objects = migoto_model::extract(&cli.input, &Configuration::default(), &texture_filter)
        .with_context(|| format!("failed to extract objects from {:?}", cli.input))?;

    for (vb_hash, object) in &objects {
        let folder = Path::new(&cli.output).join(vb_hash.as_str());
        write_object(&folder, object)
            .with_context(|| format!("failed to write object {vb_hash} to {folder:?}"))?;
        info!("Saved {} components to {folder:?}", object.components.len());
    }

    println!("Finished in {:?}", start.elapsed());
    Ok(())
}

fn write_object(folder: &Path, object: &ObjectData) -> anyhow::Result<()> {
    std::fs::create_dir_all(folder)?;

    for (i, component) in object.components.iter().enumerate() {
        let name = format!("Component {i}");
        std::fs::write(folder.join(format!("{name}.ib")), &component.ib)?;
        std::fs::write(folder.join(format!("{name}.vb")), &component.vb)?;
        std::fs::write(folder.join(format!("{name}.fmt")), component.fmt.to_string())?;
    }

    std::fs::write(
        folder.join("TextureUsage.json"),
        object.texture_usage().to_json()?,
    )?;
    std::fs::write(folder.join("Metadata.json"), object.metadata.to_json()?)?;

    for (hash, file) in object.texture_files() {
        info!(
            "Texture {hash} used by components {:?}: {:?}",
            file.components, file.path
        );
    }
    Ok(())
}
