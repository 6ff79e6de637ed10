//!
//! roster_check
//! ------------
//! Operator tool: fetch the configured roster once, bypassing the cache, and report whether
//! it is usable. `--code <c>` also runs a login check against it.
//! Exit status: 0 when the roster is valid, 2 when it is degraded.

use anyhow::Result;
use std::env;
use std::process::ExitCode;

use enrollgate::config::PortalConfig;
use enrollgate::identity::authenticate;
use enrollgate::roster::{normalize_table, source_for, Roster};

fn parse_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn main() -> Result<ExitCode> {
    let args: Vec<String> = env::args().skip(1).collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("usage: roster_check [--code <enrollment code>]");
        println!("reads PORTAL_ROSTER_SOURCE (and PORTAL_ROSTER_WORKSHEET, PORTAL_FETCH_TIMEOUT_SECS)");
        return Ok(ExitCode::SUCCESS);
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("warn"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = PortalConfig::from_env()?;
    let source = source_for(&cfg);
    println!("source: {}", source.describe());

    let roster = match source.fetch().and_then(|t| normalize_table(&t)) {
        Ok(r) => r,
        Err(e) => Roster::degraded(e),
    };
    let status = roster.status();
    println!("valid: {}", status.valid);
    println!("records: {}", status.records);
    println!("headers: {}", status.headers.join(", "));
    if let Some(err) = &status.error {
        println!("error: {}", err);
    }

    if let Some(code) = parse_arg(&args, "--code") {
        match authenticate(&code, &roster) {
            Ok(rec) => println!("code {:?}: admitted as {} ({})", code, rec.display_name, rec.identifier),
            Err(reason) => println!("code {:?}: rejected ({})", code, reason.code()),
        }
    }

    Ok(if status.valid { ExitCode::SUCCESS } else { ExitCode::from(2) })
}
