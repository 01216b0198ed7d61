use clap::Args;
use eyre::Result;
use serde_json::{json, Value};
use transferkit_core::Frame;

use super::user_facing;

#[derive(Args)]
pub struct InspectArgs {
    /// Code string as scanned.
    code: String,
}

pub fn run(args: &InspectArgs) -> Result<()> {
    let frame = Frame::parse(&args.code).map_err(user_facing)?;
    println!("{}", serde_json::to_string_pretty(&describe(&frame))?);
    Ok(())
}

fn describe(frame: &Frame) -> Value {
    json!({
        "index": frame.index,
        "total": frame.total,
        "fragment_len": frame.fragment.len(),
        "checksum": format!("{:08x}", frame.checksum),
        "last": frame.is_last(),
    })
}
