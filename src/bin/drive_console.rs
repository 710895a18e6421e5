// Drive console: type motor commands straight at the pins, no network involved
//
// Usage: cargo run --bin drive_console -- [--simulate] [--swap-forward-backward]
//
//   MOVE <speed> <direction>   e.g. MOVE 40 forward
//   STOP
//
// Put the robot on blocks first. End of input (Ctrl-D) stops all motors.

use std::io::{self, BufRead, Write};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tank_follow_runtime::config::{PinMap, WiringConvention, PWM_FREQUENCY_HZ};
use tank_follow_runtime::messages::ConsoleCommand;
use tank_follow_runtime::motor::gpio::open_pin_bank;
use tank_follow_runtime::motor::{DriveCoordinator, HardwareContext};

#[derive(Parser, Debug)]
#[command(about = "Interactive motor console")]
struct Args {
    #[arg(long)]
    simulate: bool,

    #[arg(long)]
    swap_forward_backward: bool,

    #[arg(long)]
    swap_left_right: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let wiring = WiringConvention {
        swap_forward_backward: args.swap_forward_backward,
        swap_left_right: args.swap_left_right,
    };

    let mut bank = open_pin_bank(args.simulate)?;
    let hw = HardwareContext::open(bank.as_mut(), PinMap::default(), PWM_FREQUENCY_HZ)?;
    let mut drive = DriveCoordinator::new(hw, wiring);

    println!("Commands: MOVE <speed> <direction> | STOP");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("Enter command: ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            println!();
            break;
        };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.trim().parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        let result = match command {
            ConsoleCommand::Move { speed, direction } => drive
                .apply(direction, speed)
                .map(|_| println!("Moving {} at speed {}", direction, speed)),
            ConsoleCommand::Stop => drive.stop().map(|_| println!("All motors stopped")),
        };
        if let Err(e) = result {
            error!("Motor command failed: {}", e);
        }
    }

    info!("Input closed, stopping motors");
    drive.stop()?;
    Ok(())
}
