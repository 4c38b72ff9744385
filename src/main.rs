mod cli;

fn main() {
    // The sandbox child re-enters here via `/proc/self/exe __sandbox-exec`.
    // It must install the ruleset and exec before any runtime spins up.
    if std::env::args().nth(1).as_deref() == Some(chronicle::sandbox::SANDBOX_EXEC_SUBCOMMAND) {
        let err = chronicle::sandbox::run_sandbox_child();
        eprintln!("chronicle: sandbox: {err}");
        std::process::exit(125);
    }

    std::process::exit(cli::main());
}
