use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use std::process::{exit, Command, Stdio};

#[derive(Parser)]
#[command(author, version, about = "Developer tasks for the PeerLink workspace")]
struct Cli {
    #[command(subcommand)]
    command: Task,
}

#[derive(Subcommand)]
enum Task {
    #[command(about = "Run `cargo fmt --all`")]
    Fmt,
    #[command(about = "Run format + clippy lint checks")]
    Lint,
    #[command(about = "Execute `cargo test --workspace`")]
    Test,
    #[command(about = "Run fmt + clippy + test sequence")]
    Ci,
    #[command(about = "Run the loopback demo and the candidate filter through the CLI")]
    DemoSmoke,
}

fn main() {
    let cli = Cli::parse();

    let workspace_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(|p| p.to_path_buf())
        .expect("workspace root");

    let result = match cli.command {
        Task::Fmt => run_commands(&workspace_root, [("cargo", &["fmt", "--all"])]),
        Task::Lint => run_commands(
            &workspace_root,
            [
                ("cargo", &["fmt", "--all", "--", "--check"]),
                ("cargo", &["clippy", "--workspace", "--", "-D", "warnings"]),
            ],
        ),
        Task::Test => run_commands(&workspace_root, [("cargo", &["test", "--workspace"])]),
        Task::Ci => run_ci(&workspace_root),
        Task::DemoSmoke => run_demo_smoke(&workspace_root),
    };

    if !result {
        exit(1);
    }
}

fn run_ci(workspace_root: &PathBuf) -> bool {
    if !run_commands(
        workspace_root,
        [
            ("cargo", &["fmt", "--all", "--", "--check"]),
            ("cargo", &["clippy", "--workspace", "--", "-D", "warnings"]),
        ],
    ) {
        return false;
    }
    run_commands(workspace_root, [("cargo", &["test", "--workspace"])])
}

fn run_demo_smoke(workspace_root: &PathBuf) -> bool {
    let demo = match capture_cli(
        workspace_root,
        &["demo", "--timeout-ms", "5000", "--video-fec", "false"],
    ) {
        Some(output) => output,
        None => return false,
    };
    if !demo.contains("# offer") || !demo.contains("# answer") {
        eprintln!("demo output is missing one of the negotiated descriptions");
        return false;
    }
    if demo.contains("ulpfec/90000") {
        eprintln!("demo output still advertises ulpfec with video FEC disabled");
        return false;
    }

    let tcp = "candidate:2 1 tcp 1518280447 192.0.2.10 9 typ host tcptype active";
    match capture_cli(workspace_root, &["candidate", tcp]) {
        Some(verdict) if verdict.trim() == "rejected" => true,
        Some(verdict) => {
            eprintln!("tcp candidate was not rejected: {}", verdict.trim());
            false
        }
        None => false,
    }
}

fn capture_cli(workspace_root: &PathBuf, args: &[&str]) -> Option<String> {
    let output = Command::new("cargo")
        .args(["run", "--quiet", "-p", "peerlink-cli", "--"])
        .args(args)
        .env("RUST_LOG", "warn")
        .current_dir(workspace_root)
        .stderr(Stdio::inherit())
        .output();

    match output {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => {
            eprintln!("peerlink {} failed with {}", args.join(" "), output.status);
            None
        }
        Err(err) => {
            eprintln!("failed to launch peerlink: {err}");
            None
        }
    }
}

fn run_commands<const N: usize>(
    workspace_root: &PathBuf,
    commands: [(&str, &[&str]); N],
) -> bool {
    for (program, args) in commands {
        let status = Command::new(program)
            .args(args)
            .current_dir(workspace_root)
            .status();

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                eprintln!("command '{program} {}' failed with {status}", args.join(" "));
                return false;
            }
            Err(err) => {
                eprintln!("failed to spawn '{program}': {err}");
                return false;
            }
        }
    }
    true
}
