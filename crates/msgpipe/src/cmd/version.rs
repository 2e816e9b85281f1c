use msgpipe::codec::{MESSAGE_V0_HEADER_SIZE, MESSAGE_V1_HEADER_SIZE};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("msgpipe {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: msgpipe");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("MSGPIPE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("MSGPIPE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!(
        "header_versions: v0={MESSAGE_V0_HEADER_SIZE}B, v1={MESSAGE_V1_HEADER_SIZE}B"
    );

    Ok(SUCCESS)
}
