//! Check system capabilities.

use montage_common::config::{config_file_path, AppConfig};
use montage_render_engine::engine::tool_available;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Montage System Check");
    println!("{}", "=".repeat(50));
    println!("Config: {}", config_file_path().display());

    let tools = [
        ("ffmpeg", &config.engine.ffmpeg),
        ("ffprobe", &config.engine.ffprobe),
    ];

    let mut all_ok = true;
    for (name, binary) in tools {
        if tool_available(binary) {
            println!("[OK] {name}: {}", binary.display());
        } else {
            all_ok = false;
            println!("[MISSING] {name}: {} could not be started", binary.display());
        }
    }

    match &config.engine.work_dir {
        Some(dir) => println!("[OK] Working directory root: {}", dir.display()),
        None => println!(
            "[OK] Working directory root: {} (system temp)",
            std::env::temp_dir().display()
        ),
    }

    println!();
    if all_ok {
        println!("All export formats are available. Montage is ready.");
    } else {
        println!("Clips are decoded with ffmpeg/ffprobe; set engine paths in the config file.");
    }

    Ok(())
}
