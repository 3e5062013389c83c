use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rockgpio::{
    Attribute, Direction, Edge, EdgeCallback, ErrorKind, GpioBackend, GpioConfig, GpioController,
    GpioError, Level, MockGpioBackend, NumberingMode, PullUpDown,
};

fn controller_with(config: GpioConfig) -> (Arc<MockGpioBackend>, GpioController) {
    let backend = Arc::new(MockGpioBackend::default());
    let controller = GpioController::new(Arc::new(config), backend.clone());
    (backend, controller)
}

fn native_controller() -> (Arc<MockGpioBackend>, GpioController) {
    let (backend, controller) = controller_with(GpioConfig::default());
    controller
        .set_numbering_mode(NumberingMode::Native)
        .expect("set mode");
    (backend, controller)
}

fn recording_callback() -> (Arc<Mutex<Vec<(u32, Level)>>>, EdgeCallback) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    (
        calls,
        Arc::new(move |channel, level| sink.lock().push((channel, level))),
    )
}

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(2) {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn attribute(backend: &MockGpioBackend, channel: u32, attr: Attribute) -> String {
    backend
        .read_attribute(channel, attr)
        .unwrap()
        .trim()
        .to_string()
}

#[test]
fn operations_require_numbering_mode() {
    let (_, controller) = controller_with(GpioConfig::default());
    let err = controller.input(7).unwrap_err();
    assert!(matches!(err, GpioError::ModeNotSet));
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert!(matches!(
        controller.setup(7, Direction::Out, PullUpDown::Off, Level::Low),
        Err(GpioError::ModeNotSet)
    ));
}

#[test]
fn mode_from_config_is_applied() {
    let config = GpioConfig {
        mode: Some(NumberingMode::Board),
        ..GpioConfig::default()
    };
    let (_, controller) = controller_with(config);
    assert_eq!(controller.numbering_mode(), Some(NumberingMode::Board));
    assert_eq!(controller.resolve(39).unwrap(), 35);
}

#[test]
fn mode_cannot_be_switched_once_set() {
    let (_, controller) = native_controller();
    controller
        .set_numbering_mode(NumberingMode::Native)
        .unwrap();
    assert!(matches!(
        controller.set_numbering_mode(NumberingMode::Bcm),
        Err(GpioError::ModeAlreadySet(NumberingMode::Native))
    ));
}

#[test]
fn identifier_shape_must_match_mode() {
    let (_, controller) = native_controller();
    assert!(matches!(
        controller.input(7),
        Err(GpioError::InvalidIdentifier(_))
    ));

    let (_, controller) = controller_with(GpioConfig::default());
    controller.set_numbering_mode(NumberingMode::Bcm).unwrap();
    assert!(matches!(
        controller.input("GPIO1_A3"),
        Err(GpioError::InvalidIdentifier(_))
    ));
}

#[test]
fn setup_native_output_drives_initial_level() {
    let (backend, controller) = native_controller();
    controller
        .setup("GPIO1_A3", Direction::Out, PullUpDown::Off, Level::High)
        .unwrap();

    assert!(backend.is_exported(35));
    assert_eq!(attribute(&backend, 35, Attribute::Direction), "out");
    assert_eq!(attribute(&backend, 35, Attribute::Value), "1");
    assert_eq!(controller.input("GPIO1_A3").unwrap(), Level::High);
}

#[test]
fn setup_input_does_not_write_value() {
    let (backend, controller) = native_controller();
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Up, Level::High)
        .unwrap();
    assert_eq!(attribute(&backend, 38, Attribute::Direction), "in");
    assert_eq!(backend.value_writes(38), 0);
}

#[test]
fn setup_sequence_stops_at_first_failure_without_rollback() {
    let (backend, controller) = controller_with(GpioConfig::default());
    controller.set_numbering_mode(NumberingMode::Board).unwrap();

    let err = controller
        .setup(vec![7, 1, 9], Direction::Out, PullUpDown::Off, Level::Low)
        .unwrap_err();
    assert!(matches!(err, GpioError::UnmappedPin(1)));
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert!(backend.is_exported(64));
    assert!(!backend.is_exported(65));
}

#[test]
fn board_position_beyond_header_is_out_of_range() {
    let (_, controller) = controller_with(GpioConfig::default());
    controller.set_numbering_mode(NumberingMode::Board).unwrap();
    assert!(matches!(
        controller.input(40),
        Err(GpioError::OutOfRange { position: 40, .. })
    ));
    assert!(matches!(controller.input(1), Err(GpioError::UnmappedPin(1))));
}

#[test]
fn setup_reports_export_failure() {
    let (backend, controller) = native_controller();
    backend.reject_export(35);
    let err = controller
        .setup("GPIO1_A3", Direction::Out, PullUpDown::Off, Level::High)
        .unwrap_err();
    assert!(matches!(err, GpioError::ExportFailed(35)));
    assert_eq!(err.kind(), ErrorKind::HardwareIo);
}

#[test]
fn output_on_input_channel_fails_without_writing() {
    let (backend, controller) = native_controller();
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();
    assert!(matches!(
        controller.output("GPIO1_A6", Level::High),
        Err(GpioError::WrongDirection(38))
    ));
    assert_eq!(backend.value_writes(38), 0);
}

#[test]
fn output_on_unexported_channel_fails() {
    let (_, controller) = native_controller();
    assert!(matches!(
        controller.output("GPIO1_A3", Level::High),
        Err(GpioError::NotExported(35))
    ));
}

#[test]
fn output_toggles_level() {
    let (_, controller) = native_controller();
    controller
        .setup("GPIO1_A3", Direction::Out, PullUpDown::Off, Level::Low)
        .unwrap();
    controller.output("GPIO1_A3", Level::High).unwrap();
    assert_eq!(controller.input("GPIO1_A3").unwrap(), Level::High);
    controller.output("GPIO1_A3", Level::Low).unwrap();
    assert_eq!(controller.input("GPIO1_A3").unwrap(), Level::Low);
}

#[test]
fn remove_unregistered_detection_fails() {
    let (_, controller) = native_controller();
    let err = controller.remove_event_detect("GPIO1_A6").unwrap_err();
    assert!(matches!(err, GpioError::NoSuchWatcher(38)));
    assert_eq!(err.kind(), ErrorKind::Lifecycle);
    assert!(controller.active_channels().is_empty());
}

#[test]
fn missing_callback_is_a_no_op() {
    let (backend, controller) = native_controller();
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();
    controller
        .add_event_detect("GPIO1_A6", Edge::Rising, None, 0)
        .unwrap();
    assert!(controller.active_channels().is_empty());
    assert_eq!(attribute(&backend, 38, Attribute::Edge), "none");
}

#[test]
fn detection_with_none_edge_is_rejected() {
    let (_, controller) = native_controller();
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();
    let (_, cb) = recording_callback();
    assert!(matches!(
        controller.add_event_detect("GPIO1_A6", Edge::None, Some(cb), 0),
        Err(GpioError::InvalidEdge(_))
    ));
}

#[test]
fn rising_detection_is_debounced() {
    let (backend, controller) = native_controller();
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();
    let (calls, cb) = recording_callback();
    controller
        .add_event_detect("GPIO1_A6", Edge::Rising, Some(cb), 200)
        .unwrap();
    assert_eq!(attribute(&backend, 38, Attribute::Edge), "rising");

    // the window also runs from registration
    thread::sleep(Duration::from_millis(250));

    backend.drive_input(38, Level::High).unwrap();
    assert!(wait_for(|| calls.lock().len() == 1));

    thread::sleep(Duration::from_millis(40));
    backend.drive_input(38, Level::Low).unwrap();
    backend.drive_input(38, Level::High).unwrap();

    thread::sleep(Duration::from_millis(260));
    backend.drive_input(38, Level::Low).unwrap();
    backend.drive_input(38, Level::High).unwrap();
    assert!(wait_for(|| calls.lock().len() == 2));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(*calls.lock(), vec![(38, Level::High), (38, Level::High)]);
}

#[test]
fn both_edges_report_each_level() {
    let (backend, controller) = native_controller();
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();
    let (calls, cb) = recording_callback();
    controller
        .add_event_detect("GPIO1_A6", Edge::Both, Some(cb), 0)
        .unwrap();

    backend.drive_input(38, Level::High).unwrap();
    assert!(wait_for(|| calls.lock().len() == 1));
    backend.drive_input(38, Level::Low).unwrap();
    assert!(wait_for(|| calls.lock().len() == 2));
    assert_eq!(*calls.lock(), vec![(38, Level::High), (38, Level::Low)]);
}

#[test]
fn replacing_detection_keeps_one_watcher() {
    let (backend, controller) = native_controller();
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();
    let (old_calls, old_cb) = recording_callback();
    let (new_calls, new_cb) = recording_callback();

    controller
        .add_event_detect("GPIO1_A6", Edge::Both, Some(old_cb), 0)
        .unwrap();
    controller
        .add_event_detect("GPIO1_A6", Edge::Falling, Some(new_cb), 0)
        .unwrap();
    assert_eq!(controller.active_channels(), vec![38]);
    assert_eq!(backend.open_edge_sources(38), 1);

    backend.drive_input(38, Level::High).unwrap();
    backend.drive_input(38, Level::Low).unwrap();
    assert!(wait_for(|| new_calls.lock().len() == 1));
    assert_eq!(new_calls.lock()[0], (38, Level::Low));
    assert!(old_calls.lock().is_empty());
}

#[test]
fn remove_detection_stops_callbacks() {
    let (backend, controller) = native_controller();
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();
    let (calls, cb) = recording_callback();
    controller
        .add_event_detect("GPIO1_A6", Edge::Both, Some(cb), 0)
        .unwrap();
    controller.remove_event_detect("GPIO1_A6").unwrap();

    assert!(controller.active_channels().is_empty());
    assert_eq!(backend.open_edge_sources(38), 0);
    backend.drive_input(38, Level::High).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(calls.lock().is_empty());
}

#[test]
fn detection_over_several_channels() {
    let (backend, controller) = controller_with(GpioConfig::default());
    controller.set_numbering_mode(NumberingMode::Bcm).unwrap();
    controller
        .setup(vec![12, 21], Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();
    let (calls, cb) = recording_callback();
    controller
        .add_event_detect(vec![12, 21], Edge::Rising, Some(cb), 0)
        .unwrap();
    assert_eq!(controller.active_channels(), vec![35, 38]);

    backend.drive_input(35, Level::High).unwrap();
    backend.drive_input(38, Level::High).unwrap();
    assert!(wait_for(|| calls.lock().len() == 2));

    controller.remove_event_detect(vec![12, 21]).unwrap();
    assert!(controller.active_channels().is_empty());
}

#[test]
fn accepted_events_are_published() {
    let (backend, controller) = native_controller();
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();
    let mut rx = controller.subscribe_events();
    let (calls, cb) = recording_callback();
    controller
        .add_event_detect("GPIO1_A6", Edge::Both, Some(cb), 0)
        .unwrap();

    backend.drive_input(38, Level::High).unwrap();
    assert!(wait_for(|| calls.lock().len() == 1));
    assert!(wait_for(|| controller.last_event("GPIO1_A6").unwrap().is_some()));

    let event = rx.try_recv().unwrap();
    assert_eq!((event.channel, event.level), (38, Level::High));
    let history = controller.events("GPIO1_A6", Some(10)).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].level, Level::High);
}

#[test]
fn cleanup_stops_watchers_and_unexports_own_channels() {
    let (backend, controller) = native_controller();
    backend.export(36).unwrap();
    controller
        .setup(
            vec!["GPIO1_A3", "GPIO1_A4"],
            Direction::Out,
            PullUpDown::Off,
            Level::Low,
        )
        .unwrap();
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();
    let (_, cb) = recording_callback();
    controller
        .add_event_detect("GPIO1_A6", Edge::Both, Some(cb), 0)
        .unwrap();

    controller.cleanup().unwrap();
    assert!(controller.active_channels().is_empty());
    assert!(!backend.is_exported(35));
    assert!(!backend.is_exported(38));
    // exported before the controller touched it
    assert!(backend.is_exported(36));
}

#[test]
fn callback_can_query_controller_while_its_detection_is_removed() {
    let (backend, controller) = native_controller();
    let controller = Arc::new(controller);
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();

    let entered = Arc::new(AtomicBool::new(false));
    let seen = Arc::new(Mutex::new(None));
    let (inner, flag, sink) = (controller.clone(), entered.clone(), seen.clone());
    controller
        .add_event_detect(
            "GPIO1_A6",
            Edge::Rising,
            Some(Arc::new(move |_, _| {
                flag.store(true, Ordering::SeqCst);
                let start = Instant::now();
                while !inner.active_channels().is_empty()
                    && start.elapsed() < Duration::from_secs(2)
                {
                    thread::sleep(Duration::from_millis(5));
                }
                *sink.lock() = Some(inner.active_channels());
            })),
            0,
        )
        .unwrap();

    backend.drive_input(38, Level::High).unwrap();
    assert!(wait_for(|| entered.load(Ordering::SeqCst)));

    let (tx, rx) = mpsc::channel();
    let remover = controller.clone();
    thread::spawn(move || {
        let _ = tx.send(remover.remove_event_detect("GPIO1_A6"));
    });
    let removed = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("removal did not finish");
    assert!(removed.is_ok());
    assert_eq!(*seen.lock(), Some(vec![]));
    assert!(controller.active_channels().is_empty());
    assert_eq!(backend.open_edge_sources(38), 0);
}

#[test]
fn callback_cannot_replace_its_own_detection() {
    let (backend, controller) = native_controller();
    let controller = Arc::new(controller);
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();

    let outcome = Arc::new(Mutex::new(None));
    let (inner, inner_backend, sink) = (controller.clone(), backend.clone(), outcome.clone());
    controller
        .add_event_detect(
            "GPIO1_A6",
            Edge::Rising,
            Some(Arc::new(move |_, _| {
                let replaced =
                    inner.add_event_detect("GPIO1_A6", Edge::Both, Some(Arc::new(|_, _| {})), 0);
                *sink.lock() = Some((replaced, inner_backend.open_edge_sources(38)));
            })),
            0,
        )
        .unwrap();

    backend.drive_input(38, Level::High).unwrap();
    assert!(wait_for(|| outcome.lock().is_some()));
    let (replaced, open_sources) = outcome.lock().take().unwrap();
    let err = replaced.unwrap_err();
    assert!(matches!(err, GpioError::WatcherBusy(38)));
    assert_eq!(err.kind(), ErrorKind::Lifecycle);
    assert_eq!(open_sources, 1);
    assert_eq!(controller.active_channels(), vec![38]);
    assert_eq!(attribute(&backend, 38, Attribute::Edge), "rising");

    controller.remove_event_detect("GPIO1_A6").unwrap();
    assert_eq!(backend.open_edge_sources(38), 0);
}

#[test]
fn callback_can_remove_its_own_detection() {
    let (backend, controller) = native_controller();
    let controller = Arc::new(controller);
    controller
        .setup("GPIO1_A6", Direction::In, PullUpDown::Off, Level::Low)
        .unwrap();

    let removed = Arc::new(Mutex::new(None));
    let (inner, sink) = (controller.clone(), removed.clone());
    controller
        .add_event_detect(
            "GPIO1_A6",
            Edge::Rising,
            Some(Arc::new(move |_, _| {
                *sink.lock() = Some(inner.remove_event_detect("GPIO1_A6").is_ok());
            })),
            0,
        )
        .unwrap();

    backend.drive_input(38, Level::High).unwrap();
    assert!(wait_for(|| removed.lock().is_some()));
    assert_eq!(*removed.lock(), Some(true));
    assert!(controller.active_channels().is_empty());
    assert!(wait_for(|| backend.open_edge_sources(38) == 0));
    assert!(matches!(
        controller.remove_event_detect("GPIO1_A6"),
        Err(GpioError::NoSuchWatcher(38))
    ));

    let (calls, cb) = recording_callback();
    controller
        .add_event_detect("GPIO1_A6", Edge::Both, Some(cb), 0)
        .unwrap();
    assert_eq!(backend.open_edge_sources(38), 1);
    backend.drive_input(38, Level::Low).unwrap();
    assert!(wait_for(|| calls.lock().len() == 1));
    assert_eq!(calls.lock()[0], (38, Level::Low));
}
