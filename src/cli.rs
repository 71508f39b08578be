//! Command-line argument parsing for the relay binary

use std::time::Duration;

/// Parse command line arguments
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub validate: bool,
    pub help: bool,
    /// Stop the relay after this long instead of waiting for Ctrl-C
    pub duration: Option<Duration>,
}

pub fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

/// Parse an argument list whose first element is the program name
pub fn parse_args_from(args: &[String]) -> Args {
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            "--duration" => {
                if i + 1 < args.len() {
                    i += 1;
                    result.duration = args[i].parse().ok().map(Duration::from_secs);
                }
            }
            _ => {}
        }
        i += 1;
    }

    result
}

pub fn print_help() {
    println!("mediajitter - Jitter-buffering media packet relay\n");
    println!("USAGE:");
    println!("    mediajitter [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --validate              Validate configuration and exit");
    println!("    --duration SECS         Run for SECS seconds, then flush and exit");
    println!("    --help, -h              Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    JITTER_LISTEN_ADDR          UDP address to receive packets on (required)");
    println!("    JITTER_FORWARD_ADDR         UDP address to send released packets to (required)");
    println!("    JITTER_TARGET_LATENCY_MS    Buffering latency per packet (default: 200)");
    println!("    JITTER_MAX_CAPACITY         Packets held per stream (default: 256)");
    println!("    JITTER_MAX_STREAMS          Distinct stream tags buffered (default: 16)");
    println!("    JITTER_TICK_MS              Maximum drain interval (default: 10)");
    println!("    JITTER_FLUSH_ON_SHUTDOWN    Release buffered packets on exit (default: true)");
    println!("    JITTER_STATS_INTERVAL_SECS  Stats log interval, 0 disables (default: 10)");
}
