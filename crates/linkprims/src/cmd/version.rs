use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("linkprims {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: linkprims");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("LINKPRIMS_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "profile: {}",
        option_env!("LINKPRIMS_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!(
        "git_hash: {}",
        option_env!("LINKPRIMS_GIT_HASH").unwrap_or("unknown")
    );
    println!("features: link={}, cli=true", cfg!(feature = "link"));
    println!(
        "transports: tcp, serial (default baud {})",
        crate::cmd::DEFAULT_BAUD
    );

    Ok(SUCCESS)
}
