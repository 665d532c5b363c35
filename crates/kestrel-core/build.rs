//! Build script for kestrel-core
//!
//! Checks the toolchain and target before compilation:
//! - Minimum Rust version
//! - Supported targets: Linux and Windows, x86-64 and arm64
//!
//! Unsupported targets still build (the platform-independent modules are
//! usable everywhere) but get a warning, since there is no native backend.

const MIN_RUST_VERSION: &str = "1.77.0";

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    match (rustc_version::version(), rustc_version::Version::parse(MIN_RUST_VERSION)) {
        (Ok(found), Ok(minimum)) if found < minimum => {
            panic!("kestrel-core requires Rust {minimum} or newer, found {found}");
        }
        (Ok(_), Ok(_)) => {}
        // some build environments hide the compiler version
        _ => println!("cargo:warning=could not verify Rust version"),
    }

    check_target();
}

fn check_target()
{
    // build scripts run on the host, so inspect the target through cargo's env
    let os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    if os != "linux" && os != "windows" {
        println!("cargo:warning=kestrel-core has no native backend for target OS '{os}'");
    }
    if arch != "x86_64" && arch != "aarch64" {
        println!("cargo:warning=kestrel-core does not support target architecture '{arch}'");
    }
    if os == "windows" && arch == "aarch64" {
        println!("cargo:warning=thread context access is x86-64 only on Windows");
    }
}
