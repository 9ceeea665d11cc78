use std::path::PathBuf;
use std::process::ExitCode;

use crossdeployqt::binary;
use crossdeployqt::config::DeployPlan;
use crossdeployqt::deploy;
use crossdeployqt::error::{exit_code_for, DeployError};
use crossdeployqt::layout;
use crossdeployqt::preflight;

struct Args {
    binary: PathBuf,
    out_dir: PathBuf,
    qml_roots: Vec<PathBuf>,
    languages: Vec<String>,
    overlays: Vec<PathBuf>,
}

fn usage() -> &'static str {
    "Usage: crossdeployqt --bin <path-to-binary> --out <output-dir> \
     [--qml-root <dir>]... [--languages <lang[,lang...]>] [--overlay <dir>]..."
}

enum ParsedArgs {
    Run(Args),
    Help,
    Invalid(String),
}

fn parse_args(raw: &[String]) -> ParsedArgs {
    let mut binary = None;
    let mut out_dir = None;
    let mut qml_roots = Vec::new();
    let mut languages = Vec::new();
    let mut overlays = Vec::new();

    let mut i = 0;
    while i < raw.len() {
        let arg = raw[i].as_str();
        let value = |i: &mut usize| -> Option<&String> {
            if *i + 1 < raw.len() {
                *i += 1;
                Some(&raw[*i])
            } else {
                None
            }
        };
        match arg {
            "--bin" => match value(&mut i) {
                Some(v) => binary = Some(PathBuf::from(v)),
                None => return ParsedArgs::Invalid("--bin needs a value".into()),
            },
            "--out" => match value(&mut i) {
                Some(v) => out_dir = Some(PathBuf::from(v)),
                None => return ParsedArgs::Invalid("--out needs a value".into()),
            },
            "--qml-root" => match value(&mut i) {
                Some(v) => qml_roots.push(PathBuf::from(v)),
                None => return ParsedArgs::Invalid("--qml-root needs a value".into()),
            },
            "--languages" => match value(&mut i) {
                Some(v) => {
                    languages.extend(v.split(',').filter(|s| !s.is_empty()).map(String::from))
                }
                None => return ParsedArgs::Invalid("--languages needs a value".into()),
            },
            "--overlay" => match value(&mut i) {
                Some(v) => overlays.push(PathBuf::from(v)),
                None => return ParsedArgs::Invalid("--overlay needs a value".into()),
            },
            "-h" | "--help" => return ParsedArgs::Help,
            other => return ParsedArgs::Invalid(format!("unknown argument: {}", other)),
        }
        i += 1;
    }

    let (Some(binary), Some(out_dir)) = (binary, out_dir) else {
        return ParsedArgs::Invalid("--bin and --out are required".into());
    };
    ParsedArgs::Run(Args {
        binary,
        out_dir,
        qml_roots,
        languages,
        overlays,
    })
}

fn run(args: Args) -> Result<(), anyhow::Error> {
    if let Err(reason) = deploy::binary_is_deployable(&args.binary) {
        return Err(DeployError::Usage(reason).into());
    }

    let kind = binary::detect(&args.binary).map_err(|e| DeployError::Detect {
        path: args.binary.clone(),
        reason: e.reason,
    })?;
    println!("Detected: {}", kind);

    let missing = preflight::missing_tools(kind);
    if !missing.is_empty() {
        return Err(DeployError::Usage(format!(
            "missing required tools for {} deployment: {}",
            kind,
            missing.join(", ")
        ))
        .into());
    }

    let output_root = layout::platform_output_root(kind, &args.out_dir, &args.binary);
    let plan = DeployPlan {
        kind,
        binary: args.binary,
        output_root: output_root.clone(),
        qml_roots: args.qml_roots,
        languages: args.languages,
        overlays: args.overlays,
    };

    deploy::deploy(&plan)?;
    println!("Deployment complete at: {}", output_root.display());
    Ok(())
}

fn main() -> ExitCode {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&raw) {
        ParsedArgs::Help => {
            eprintln!("{}", usage());
            ExitCode::SUCCESS
        }
        ParsedArgs::Invalid(reason) => {
            eprintln!("Error: {}", reason);
            eprintln!("{}", usage());
            ExitCode::from(2)
        }
        ParsedArgs::Run(args) => match run(args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("Error: {:#}", err);
                ExitCode::from(exit_code_for(&err) as u8)
            }
        },
    }
}
