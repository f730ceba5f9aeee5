use clap::{Parser, Subcommand};
use std::process::{Command, ExitCode};

/// eBPF 분류기 크레이트 경로 (workspace 루트 기준)
const EBPF_CRATE_DIR: &str = "crates/dataplane/ebpf";

/// microseg 빌드 태스크
#[derive(Parser)]
#[command(name = "xtask")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// TC 분류기(microseg-ebpf) 빌드
    BuildEbpf {
        /// 릴리스 모드로 빌드
        #[arg(long)]
        release: bool,
    },
    /// 분류기를 빌드한 뒤 데몬을 실행 (root 권한 필요)
    Run {
        /// 릴리스 모드로 빌드
        #[arg(long)]
        release: bool,
        /// 데몬에 그대로 전달할 인자
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::BuildEbpf { release } => build_ebpf(release),
        Commands::Run { release, args } => build_ebpf(release).and_then(|()| run_daemon(release, &args)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn build_ebpf(release: bool) -> Result<(), String> {
    let mut cmd = Command::new("cargo");
    cmd.current_dir(EBPF_CRATE_DIR);

    cmd.args([
        "+nightly",
        "build",
        "--target=bpfel-unknown-none",
        "-Z",
        "build-std=core",
    ]);

    if release {
        cmd.arg("--release");
    }

    run(cmd, "eBPF build")?;
    println!("eBPF build succeeded");
    Ok(())
}

fn run_daemon(release: bool, args: &[String]) -> Result<(), String> {
    let profile = if release { "release" } else { "debug" };
    let program = format!("{EBPF_CRATE_DIR}/target/bpfel-unknown-none/{profile}/microseg-ebpf");

    let mut cmd = Command::new("cargo");
    cmd.args(["run", "-p", "microseg-daemon"]);
    if release {
        cmd.arg("--release");
    }
    cmd.args(["--", "--program", &program]);
    cmd.args(args);

    run(cmd, "microseg-daemon")
}

fn run(mut cmd: Command, what: &str) -> Result<(), String> {
    let status = cmd
        .status()
        .map_err(|e| format!("failed to spawn {what}: {e}"))?;
    if !status.success() {
        return Err(format!("{what} failed: {status}"));
    }
    Ok(())
}
