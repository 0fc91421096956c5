//! Emissions readiness report
//!
//! Connects to the vehicle through an ELM327-compatible scan tool and
//! prints the state-inspection readiness status of every emissions
//! monitor, roughly what a smog station checks first.

use anyhow::Context;
use clap::Parser;

use obdscan::{Interface, Payload, Request};

#[derive(Parser)]
#[command(version, about = "Print the vehicle's emissions readiness report")]
struct Args {
    /// Serial device the scan tool is attached to
    #[arg(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Walk the protocols one by one instead of using the scan tool's
    /// automatic search
    #[arg(long)]
    search: bool,

    /// Emit the decoded monitor report as JSON
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    stderrlog::new()
        .verbosity(args.verbose as usize + 1)
        .init()?;

    let mut interface = Interface::new(&args.port)
        .with_context(|| format!("no scan tool found on {}", args.port))?;
    interface.set_status_callback(Some(Box::new(|status| eprintln!("{}", status))));

    interface.open()?;
    let protocol = if args.search {
        interface.search_for_protocol()?
    } else {
        interface.set_protocol(None)?;
        interface.connect()?
    };
    eprintln!("Connected via {}", protocol);

    let responses = interface
        .send_request(&Request::pid(0x01, 0x01))
        .context("vehicle did not answer the readiness query")?;
    for response in responses {
        if let Payload::MonitorStatus(report) = response.payload {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.emissions_status());
                println!();
                println!("MIL: {}", if report.mil { "ON" } else { "OFF" });
                println!("Stored DTCs: {}", report.dtc_count);
            }
        }
    }

    interface.disconnect()?;
    interface.close()?;
    Ok(())
}
