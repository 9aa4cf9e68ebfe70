use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rtk_client::{
    ConnectionConfig, KVClient, Logger, NumericArray, Object, RetryPolicy, SubscriberManager,
    SubscriberSettings, SubscriberState, Toolkit, ToolkitOptions, Value, CONTROL_CHANNEL,
};
use rtk_server::ServerHandle;

type Received = Arc<Mutex<Vec<(String, Value)>>>;

fn options() -> ToolkitOptions {
    ToolkitOptions {
        subscriber_retry_delay: Duration::from_millis(50),
        reconnect_poll_interval: Duration::from_millis(50),
        subscriber_stop_timeout: Duration::from_secs(3),
        retry: RetryPolicy {
            attempts: 2,
            first: Duration::from_millis(10),
            max: Duration::from_millis(20),
            factor: 2.0,
        },
        ..ToolkitOptions::default()
    }
}

fn connection(server: &ServerHandle) -> ConnectionConfig {
    let mut config = ConnectionConfig::from_addr(&server.local_addr().to_string());
    config.connect_timeout = Some(Duration::from_millis(500));
    config.read_timeout = Some(Duration::from_secs(2));
    config
}

fn toolkit(server: &ServerHandle) -> Toolkit {
    Toolkit::builder()
        .connection(&connection(server))
        .options(options())
        .logger(Logger::disabled())
        .build()
}

fn subscribed_toolkit(server: &ServerHandle, channels: &[&str]) -> (Toolkit, Received) {
    let received: Received = Arc::default();
    let sink = received.clone();
    let kit = Toolkit::builder()
        .connection(&connection(server))
        .options(options())
        .logger(Logger::disabled())
        .channels(channels.iter().copied())
        .handler(move |channel: &str, value: Value| {
            sink.lock().unwrap().push((channel.to_string(), value));
            Ok(())
        })
        .build();
    (kit, received)
}

fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn stores_and_reads_every_value_kind() {
    let server = ServerHandle::spawn("127.0.0.1:0").expect("server");
    let kit = toolkit(&server);
    assert!(kit.health_check());

    let values = vec![
        ("null", Value::Null),
        ("flag", Value::Bool(true)),
        ("count", Value::Int(12345)),
        ("ratio", Value::Float(0.125)),
        ("name", Value::Str("ünïcode".into())),
        ("blob", Value::Bytes(vec![0, 159, 146, 150])),
        ("list", Value::List(vec![Value::Int(2), Value::Str("x".into())])),
        ("pair", Value::Tuple(vec![Value::Int(3), Value::Float(4.5)])),
        ("map", Value::dict([("a", Value::Int(1)), ("b", Value::List(vec![Value::Bool(true), Value::Null]))])),
        ("matrix", Value::from(NumericArray::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap())),
        ("object", Value::from(Object::new("User").with_field("id", 9).with_field("tags", vec![Value::from("a")]))),
    ];

    for (key, value) in &values {
        kit.set(key, value.clone()).expect("set");
    }
    for (key, value) in &values {
        assert_eq!(kit.get(key).expect("get").as_ref(), Some(value), "key {}", key);
    }
    assert_eq!(kit.get("never-set").expect("get"), None);

    assert!(kit.delete("flag").expect("delete"));
    assert_eq!(kit.get("flag").expect("get"), None);
}

#[test]
fn batch_operations_round_trip() {
    let server = ServerHandle::spawn("127.0.0.1:0").expect("server");
    let kit = toolkit(&server);

    kit.batch_set([
        ("user:1", Value::dict([("name", "ada")])),
        ("user:2", Value::dict([("name", "grace")])),
        ("visits", Value::Int(40)),
    ])
    .expect("batch set");

    let got = kit.batch_get(&["user:1", "user:2", "visits", "user:3"]).expect("batch get");
    assert_eq!(got["user:1"], Some(Value::dict([("name", "ada")])));
    assert_eq!(got["user:2"], Some(Value::dict([("name", "grace")])));
    assert_eq!(got["visits"], Some(Value::Int(40)));
    assert_eq!(got["user:3"], None);
}

#[test]
fn oversized_value_is_rejected_without_writing() {
    let server = ServerHandle::spawn("127.0.0.1:0").expect("server");
    let kit = toolkit(&server);
    let tight = ToolkitOptions {
        max_value_size: 32,
        ..options()
    };

    let err = kit.set_with("big", "y".repeat(100), &tight).expect_err("too big");
    assert!(err.is_validation());
    assert_eq!(kit.get("big").expect("get"), None);
}

#[test]
fn subscriber_receives_until_stopped() {
    let server = ServerHandle::spawn("127.0.0.1:0").expect("server");
    let (listener, received) = subscribed_toolkit(&server, &["orders", "alerts"]);
    let publisher = toolkit(&server);

    assert!(wait_until(
        || listener.subscriber_state() == SubscriberState::Listening,
        Duration::from_secs(3)
    ));

    assert_eq!(publisher.publish("orders", Value::dict([("id", 1)])).expect("publish"), 1);
    assert_eq!(publisher.publish("alerts", Value::Bytes(vec![7, 7])).expect("publish"), 1);
    assert!(wait_until(|| received.lock().unwrap().len() == 2, Duration::from_secs(3)));
    assert_eq!(
        received.lock().unwrap().clone(),
        vec![
            ("orders".to_string(), Value::dict([("id", 1)])),
            ("alerts".to_string(), Value::Bytes(vec![7, 7])),
        ]
    );

    let began = Instant::now();
    assert!(listener.stop_subscriber());
    assert!(began.elapsed() < Duration::from_secs(3));
    assert_eq!(listener.subscriber_state(), SubscriberState::Idle);

    publisher.publish("orders", Value::Int(2)).expect("publish");
    thread::sleep(Duration::from_millis(100));
    assert_eq!(received.lock().unwrap().len(), 2);
}

#[test]
fn two_listeners_stop_independently() {
    let server = ServerHandle::spawn("127.0.0.1:0").expect("server");
    let (first, first_received) = subscribed_toolkit(&server, &["shared"]);
    let (second, second_received) = subscribed_toolkit(&server, &["shared"]);
    let publisher = toolkit(&server);

    assert!(wait_until(
        || first.subscriber_state() == SubscriberState::Listening
            && second.subscriber_state() == SubscriberState::Listening,
        Duration::from_secs(3)
    ));

    assert!(first.stop_subscriber());
    assert_eq!(second.subscriber_state(), SubscriberState::Listening);

    publisher.publish("shared", "after").expect("publish");
    assert!(wait_until(|| second_received.lock().unwrap().len() == 1, Duration::from_secs(3)));
    assert!(first_received.lock().unwrap().is_empty());
}

#[test]
fn subscriber_recovers_after_server_restart() {
    let server = ServerHandle::spawn("127.0.0.1:0").expect("server");
    let addr = server.local_addr();
    let (listener, received) = subscribed_toolkit(&server, &["feed"]);

    assert!(wait_until(
        || listener.subscriber_state() == SubscriberState::Listening,
        Duration::from_secs(3)
    ));

    server.shutdown();
    assert!(wait_until(
        || listener.subscriber_state() == SubscriberState::Reconnecting,
        Duration::from_secs(3)
    ));
    assert!(!listener.health_check());

    let server = ServerHandle::spawn(addr).expect("restart");
    let publisher = toolkit(&server);

    // The listener resubscribes on its own; publish until it hears us.
    let delivered = wait_until(
        || {
            let _ = publisher.publish("feed", "again");
            !received.lock().unwrap().is_empty()
        },
        Duration::from_secs(5),
    );
    assert!(delivered);
    assert_eq!(received.lock().unwrap()[0], ("feed".to_string(), Value::Str("again".into())));
    assert_eq!(listener.subscriber_state(), SubscriberState::Listening);
    assert!(listener.stop_subscriber());
}

#[test]
fn dropped_manager_closes_its_subscription() {
    let server = ServerHandle::spawn("127.0.0.1:0").expect("server");
    let addr = server.local_addr().to_string();
    let settings = SubscriberSettings {
        retry_delay: Duration::from_millis(50),
        poll_interval: Duration::from_millis(50),
    };
    let manager = SubscriberManager::new(
        Arc::new(KVClient::connect(addr.clone())),
        settings,
        Logger::disabled(),
    );
    assert!(manager.start(&["leak".to_string()], |_: &str, _: Value| Ok(())));
    assert!(wait_until(
        || manager.state() == SubscriberState::Listening,
        Duration::from_secs(3)
    ));

    drop(manager);

    let publisher = KVClient::connect(addr);
    assert!(wait_until(
        || publisher.publish(CONTROL_CHANNEL, b"stop:0:0").expect("publish") == 0,
        Duration::from_secs(3)
    ));
    assert_eq!(publisher.publish("leak", b"after").expect("publish"), 0);
}
