//! Command-line flags. Each one overrides the matching settings field.

use std::path::PathBuf;

use crate::settings::{CaptureSource, HostSettings};

pub const USAGE: &str = "\
Usage: livescribe [--settings <file.json>] [--wav <file.wav>] [--no-realtime]
                  [--device <name>] [--model <path>] [--save-settings]

--save-settings writes the resolved settings back to the settings file.

Reads one JSON request per line on stdin and writes responses and events
as JSON lines on stdout. Logs go to stderr (RUST_LOG overrides the filter).";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub settings: Option<PathBuf>,
    pub wav: Option<PathBuf>,
    pub no_realtime: bool,
    pub device: Option<String>,
    pub model: Option<String>,
    pub save_settings: bool,
    pub help: bool,
}

impl CliArgs {
    pub fn apply(&self, settings: &mut HostSettings) {
        if let Some(wav) = &self.wav {
            settings.capture_source = CaptureSource::Wav;
            settings.wav_path = Some(wav.clone());
        }
        if self.no_realtime {
            settings.wav_realtime = false;
        }
        if let Some(device) = &self.device {
            settings.capture_source = CaptureSource::Microphone;
            settings.preferred_input_device = Some(device.clone());
        }
        if let Some(model) = &self.model {
            settings.default_model_path = model.clone();
        }
    }
}

pub fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut out = CliArgs::default();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--settings" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --settings".into());
                };
                out.settings = Some(PathBuf::from(v));
            }
            "--wav" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --wav".into());
                };
                out.wav = Some(PathBuf::from(v));
            }
            "--no-realtime" => out.no_realtime = true,
            "--device" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --device".into());
                };
                out.device = Some(v);
            }
            "--model" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --model".into());
                };
                out.model = Some(v);
            }
            "--save-settings" => out.save_settings = true,
            "--help" | "-h" => out.help = true,
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    if out.wav.is_some() && out.device.is_some() {
        return Err("--wav and --device are mutually exclusive".into());
    }
    Ok(out)
}
