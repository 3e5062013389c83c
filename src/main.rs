use log::{info, warn};
use std::io::BufRead;
use std::sync::Arc;

use serde::Deserialize;

use rockgpio::{
    Direction, Edge, GpioConfig, GpioController, GpioError, Level, NumberingMode, PullUpDown,
};

#[cfg(not(feature = "hardware-gpio"))]
use rockgpio::MockGpioBackend;
#[cfg(feature = "hardware-gpio")]
use rockgpio::SysfsBackend;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DemoConfig {
    #[serde(flatten)]
    gpio: GpioConfig,
    led: String,
    button: String,
    debounce_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            gpio: GpioConfig::default(),
            led: "GPIO1_A3".to_string(),
            button: "GPIO1_A6".to_string(),
            debounce_ms: 500,
        }
    }
}

fn load_config() -> Result<DemoConfig, GpioError> {
    let Some(path) = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ROCKGPIO_CONFIG").ok())
    else {
        return Ok(DemoConfig::default());
    };
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| GpioError::Config(format!("Failed to read config {path}: {e}")))?;
    serde_json::from_str(&contents)
        .map_err(|e| GpioError::Config(format!("Invalid config json: {e}")))
}

fn main() -> Result<(), GpioError> {
    env_logger::init();

    let DemoConfig {
        gpio,
        led,
        button,
        debounce_ms,
    } = load_config()?;

    let backend = {
        #[cfg(feature = "hardware-gpio")]
        {
            Arc::new(SysfsBackend::new(gpio.sysfs_root.clone()))
        }
        #[cfg(not(feature = "hardware-gpio"))]
        {
            Arc::new(MockGpioBackend::default())
        }
    };
    let controller = Arc::new(GpioController::new(Arc::new(gpio), backend));

    controller.set_numbering_mode(NumberingMode::Native)?;
    controller.set_warnings(true);
    controller.setup(led.as_str(), Direction::Out, PullUpDown::Off, Level::High)?;
    controller.setup(button.as_str(), Direction::In, PullUpDown::Off, Level::Low)?;

    let led_state = Arc::new(parking_lot::Mutex::new(Level::High));
    let toggler = controller.clone();
    let led_name = led.clone();
    controller.add_event_detect(
        button.as_str(),
        Edge::Rising,
        Some(Arc::new(move |channel, level| {
            info!("got level {level} on channel {channel}");
            let mut state = led_state.lock();
            *state = state.toggled();
            if let Err(e) = toggler.output(led_name.as_str(), *state) {
                warn!("toggle {led_name}: {e}");
            }
        })),
        debounce_ms,
    )?;

    info!("watching {button}, press enter to stop");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| GpioError::Gpio(format!("read stdin: {e}")))?;

    controller.remove_event_detect(button.as_str())?;
    controller.cleanup()
}
