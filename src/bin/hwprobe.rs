use anyhow::Result;
use catwatch::hardware::{select_model, DeviceClass, HardwareDescriptor};
use clap::{Parser, ValueEnum};
use serde::Serialize;

/// Print the probed hardware profile and the model it selects.
#[derive(Parser, Debug)]
#[command(name = "hwprobe")]
#[command(about = "Show the hardware profile and detection model catwatch would use")]
struct Args {
    /// Treat the host as this device class
    #[arg(long, value_enum)]
    device: Option<DeviceArg>,

    /// Explicit model name, as configured by detection.model
    #[arg(long)]
    model: Option<String>,

    /// Single-line JSON instead of pretty output
    #[arg(long)]
    compact: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeviceArg {
    Jetson,
    RaspberryPi,
    Generic,
}

impl From<DeviceArg> for DeviceClass {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Jetson => DeviceClass::Jetson,
            DeviceArg::RaspberryPi => DeviceClass::RaspberryPi,
            DeviceArg::Generic => DeviceClass::Generic,
        }
    }
}

#[derive(Serialize)]
struct ProbeReport {
    hardware: HardwareDescriptor,
    selection: catwatch::ModelSelection,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut hardware = HardwareDescriptor::probe();
    if let Some(device) = args.device {
        hardware = hardware.with_device_class(device.into());
    }
    let selection = select_model(&hardware, args.model.as_deref());

    let report = ProbeReport { hardware, selection };
    let output = if args.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{}", output);
    Ok(())
}
