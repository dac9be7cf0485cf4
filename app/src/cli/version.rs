//! Version information, including the engine's when it is installed.

use anyhow::Result;

use rc_types::CoreKind;

pub fn run() -> Result<()> {
    println!("raycoon {}", env!("CARGO_PKG_VERSION"));
    match rc_engine::Supervisor::new(CoreKind::Xray) {
        Ok(engine) => match engine.version() {
            Ok(version) if !version.is_empty() => println!("engine: {version}"),
            _ => println!("engine: unknown"),
        },
        Err(_) => println!("engine: not installed"),
    }
    Ok(())
}
