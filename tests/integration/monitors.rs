//! Integration tests for property monitors and notification delivery.

use std::{path::Path, time::Duration};

use autobridge_common::{
    DeviceCommand, DeviceRequest, MonitorSpec, Notification, PropertyMonitor, ServiceRequest,
};
use reqwest::Client;
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpListener,
    time::{Instant, sleep, timeout},
};

use crate::common::{get_free_port, spawn_agent_with_config, temp_path, wait_for_listening};

fn sensor_config(port: u16, value_file: &Path) -> String {
    format!(
        r#"
        [server]
        port = {port}
        bind = "127.0.0.1"
        sample_interval_ms = 50

        [devices.lightMeter]
        kind = "sensor"
        [devices.lightMeter.properties.light]
        source = "file"
        path = "{}"
        "#,
        value_file.display()
    )
}

fn arm_light_monitor(response_url: Option<String>) -> ServiceRequest {
    ServiceRequest {
        response_url,
        device_requests: vec![DeviceRequest {
            device_id: "lightMeter".to_string(),
            commands_to_execute: vec![],
            properties_to_monitor: vec![MonitorSpec::Threshold(PropertyMonitor {
                name: "light".to_string(),
                report_changed_by_value: 5.0,
                report_changed_by_percent: 0.0,
            })],
        }],
    }
}

#[tokio::test]
async fn test_queued_notifications_are_polled() {
    let port = get_free_port();
    let value_file = temp_path("light_polled", port);
    std::fs::write(&value_file, "10\n").unwrap();
    let _agent = spawn_agent_with_config(port, &sensor_config(port, &value_file));
    wait_for_listening(port, 5).await;

    let client = Client::new();
    let base = format!("http://127.0.0.1:{port}");
    let resp = client
        .post(format!("{base}/"))
        .json(&arm_light_monitor(None))
        .send()
        .await
        .expect("failed to arm monitor");
    assert_eq!(resp.status(), 200);

    // Let the sampler take the baseline, then move within the threshold.
    sleep(Duration::from_millis(300)).await;
    std::fs::write(&value_file, "12\n").unwrap();
    sleep(Duration::from_millis(300)).await;
    std::fs::write(&value_file, "16\n").unwrap();

    let start = Instant::now();
    let notifications = loop {
        let polled: Vec<Notification> = client
            .get(format!("{base}/notifications"))
            .send()
            .await
            .expect("failed to poll")
            .json()
            .await
            .expect("invalid json");
        if !polled.is_empty() {
            break polled;
        }
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "no notification within timeout"
        );
        sleep(Duration::from_millis(100)).await;
    };
    assert_eq!(notifications.len(), 1, "unexpected notifications: {notifications:?}");
    let notification = &notifications[0];
    assert_eq!(notification.device_id, "lightMeter");
    assert_eq!(notification.property_name, "light");
    assert!((notification.old_value - 10.0).abs() < f64::EPSILON);
    assert!((notification.new_value - 16.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_callback_receives_notification() {
    let port = get_free_port();
    let value_file = temp_path("light_callback", port);
    std::fs::write(&value_file, "100\n").unwrap();
    let _agent = spawn_agent_with_config(port, &sensor_config(port, &value_file));
    wait_for_listening(port, 5).await;

    let hub = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let callback = format!("http://{}/hub/notify", hub.local_addr().unwrap());

    let resp = Client::new()
        .post(format!("http://127.0.0.1:{port}/"))
        .json(&arm_light_monitor(Some(callback)))
        .send()
        .await
        .expect("failed to arm monitor");
    assert_eq!(resp.status(), 200);

    sleep(Duration::from_millis(300)).await;
    std::fs::write(&value_file, "90\n").unwrap();

    let (mut socket, _) = timeout(Duration::from_secs(5), hub.accept())
        .await
        .expect("callback was not invoked within timeout")
        .unwrap();
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while !String::from_utf8_lossy(&received).contains("\"newValue\":90.0") {
        let n = timeout(Duration::from_secs(5), socket.read(&mut buf))
            .await
            .expect("callback body did not arrive")
            .unwrap();
        assert!(n > 0, "connection closed before body arrived");
        received.extend_from_slice(&buf[..n]);
    }
    socket
        .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
        .await
        .unwrap();

    let request = String::from_utf8_lossy(&received);
    assert!(request.starts_with("POST /hub/notify"), "unexpected request: {request}");
    assert!(request.contains("\"oldValue\":100.0"), "unexpected body: {request}");
    assert!(request.contains("\"propertyName\":\"light\""), "unexpected body: {request}");
}

#[tokio::test]
async fn test_pushed_values_trigger_monitors() {
    let port = get_free_port();
    let config = format!(
        r#"
        [server]
        port = {port}
        bind = "127.0.0.1"
        sample_interval_ms = 50

        [devices.humidityMeter]
        kind = "sensor"
        [devices.humidityMeter.properties.humidity]
        source = "manual"
        "#
    );
    let _agent = spawn_agent_with_config(port, &config);
    wait_for_listening(port, 5).await;

    let client = Client::new();
    let base = format!("http://127.0.0.1:{port}");
    // Arming an identical monitor again would reset it, so only the first request arms.
    let set = |value: &str, properties_to_monitor: Vec<MonitorSpec>| ServiceRequest {
        response_url: None,
        device_requests: vec![DeviceRequest {
            device_id: "humidityMeter".to_string(),
            commands_to_execute: vec![DeviceCommand {
                name: "set".to_string(),
                arguments: vec!["humidity".to_string(), value.to_string()],
            }],
            properties_to_monitor,
        }],
    };
    let resp = client
        .post(format!("{base}/"))
        .json(&set("40", vec![MonitorSpec::Property("humidity".to_string())]))
        .send()
        .await
        .expect("failed to push value");
    assert_eq!(resp.status(), 200);

    sleep(Duration::from_millis(300)).await;
    let resp = client
        .post(format!("{base}/"))
        .json(&set("55.5", vec![]))
        .send()
        .await
        .expect("failed to push value");
    assert_eq!(resp.status(), 200);

    let start = Instant::now();
    let notifications = loop {
        let polled: Vec<Notification> = client
            .get(format!("{base}/notifications"))
            .send()
            .await
            .expect("failed to poll")
            .json()
            .await
            .expect("invalid json");
        if !polled.is_empty() {
            break polled;
        }
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "no notification within timeout"
        );
        sleep(Duration::from_millis(100)).await;
    };
    assert_eq!(notifications.len(), 1, "unexpected notifications: {notifications:?}");
    assert_eq!(notifications[0].property_name, "humidity");
    assert!((notifications[0].old_value - 40.0).abs() < f64::EPSILON);
    assert!((notifications[0].new_value - 55.5).abs() < f64::EPSILON);
}
