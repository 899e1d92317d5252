//! Integration tests for the control endpoint's request forms.

use autobridge_common::{DeviceCommand, DeviceRequest, ServiceRequest};
use reqwest::Client;

use crate::common::{
    get_free_port, send_raw, spawn_agent_with_config, speech_config, temp_path,
    wait_for_file_containing, wait_for_listening,
};

#[tokio::test]
async fn test_legacy_line_is_spoken() {
    let port = get_free_port();
    let spoken = temp_path("spoken_legacy", port);
    drop(std::fs::remove_file(&spoken));
    let _agent = spawn_agent_with_config(port, &speech_config(port, &spoken));
    wait_for_listening(port, 5).await;

    let response = send_raw(
        port,
        b"GET /&SPEAK=the laundry is done&@DONE@ HTTP/1.1\r\nHost: tablet\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "unexpected response: {response}");
    assert!(response.ends_with("\r\n\r\nOK"), "unexpected body: {response}");

    wait_for_file_containing(&spoken, "the laundry is done", 5).await;
}

#[tokio::test]
async fn test_structured_and_parameter_forms_are_spoken_in_order() {
    let port = get_free_port();
    let spoken = temp_path("spoken_forms", port);
    drop(std::fs::remove_file(&spoken));
    let _agent = spawn_agent_with_config(port, &speech_config(port, &spoken));
    wait_for_listening(port, 5).await;

    let client = Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let request = ServiceRequest {
        response_url: None,
        device_requests: vec![DeviceRequest {
            device_id: "speechSynthesizer".to_string(),
            commands_to_execute: vec![
                DeviceCommand::speak("first"),
                DeviceCommand::speak("second"),
            ],
            properties_to_monitor: vec![],
        }],
    };
    let resp = client
        .post(format!("{base}/"))
        .json(&request)
        .send()
        .await
        .expect("failed to send structured request");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");

    let resp = client
        .get(format!("{base}/?Message=third%20one"))
        .send()
        .await
        .expect("failed to send query request");
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{base}/"))
        .form(&[("Message", "fourth & last")])
        .send()
        .await
        .expect("failed to send form request");
    assert_eq!(resp.status(), 200);

    let contents = wait_for_file_containing(&spoken, "fourth & last", 5).await;
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines, ["first", "second", "third one", "fourth & last"]);
}

#[tokio::test]
async fn test_bad_sessions_get_error_acknowledgment() {
    let port = get_free_port();
    let spoken = temp_path("spoken_bad", port);
    let _agent = spawn_agent_with_config(port, &speech_config(port, &spoken));
    wait_for_listening(port, 5).await;

    let client = Client::new();
    let resp = client
        .get(format!("http://127.0.0.1:{port}/favicon.ico"))
        .send()
        .await
        .expect("failed to send request");
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.text().await.unwrap(), "ERROR: Unrecognized request");

    let resp = client
        .post(format!("http://127.0.0.1:{port}/"))
        .header("content-type", "application/json")
        .body(r#"{"deviceRequests":[{"deviceID":7}]}"#)
        .send()
        .await
        .expect("failed to send request");
    assert_eq!(resp.status(), 400);
    assert!(resp.text().await.unwrap().starts_with("ERROR: Malformed request"));

    // The listener survives bad sessions.
    let response = send_raw(port, b"GET /&SPEAK=still here&@DONE@ HTTP/1.1\r\n\r\n").await;
    assert!(response.ends_with("OK"), "unexpected response: {response}");
}

#[tokio::test]
async fn test_unknown_device_is_accepted_without_side_effects_on_siblings() {
    let port = get_free_port();
    let spoken = temp_path("spoken_siblings", port);
    drop(std::fs::remove_file(&spoken));
    let _agent = spawn_agent_with_config(port, &speech_config(port, &spoken));
    wait_for_listening(port, 5).await;

    let request = ServiceRequest {
        response_url: None,
        device_requests: vec![
            DeviceRequest {
                device_id: "ghost".to_string(),
                commands_to_execute: vec![DeviceCommand::speak("boo")],
                properties_to_monitor: vec![],
            },
            DeviceRequest {
                device_id: "speechSynthesizer".to_string(),
                commands_to_execute: vec![DeviceCommand::speak("sibling")],
                properties_to_monitor: vec![],
            },
        ],
    };
    let resp = Client::new()
        .post(format!("http://127.0.0.1:{port}/"))
        .json(&request)
        .send()
        .await
        .expect("failed to send request");
    assert_eq!(resp.status(), 200);
    let contents = wait_for_file_containing(&spoken, "sibling", 5).await;
    assert!(!contents.contains("boo"), "unknown device must not speak");
}
