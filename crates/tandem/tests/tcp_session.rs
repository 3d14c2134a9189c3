//! A host and a participant talking over real TCP sockets.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{Counter, content};
use tandem::{
    AuthPolicy, CommandPacket, CompanyId, Credentials, Host, HostEvent, HostServer,
    NetworkConfig, NoRendezvous, Participant, ParticipantClient, ParticipantEvent, RecvStatus,
};
use tokio::sync::oneshot;

fn fast_config(name: &str) -> NetworkConfig {
    NetworkConfig {
        frame_rate: 100,
        player_name: name.into(),
        ..common::config()
    }
}

#[tokio::test]
async fn test_tcp_participant_joins_and_runs_commands() {
    let host = Host::new(
        fast_config("host"),
        AuthPolicy::Password {
            password: "pw".into(),
        },
        Counter::default(),
        content(),
    );
    let server = HostServer::bind("127.0.0.1:0", host).await.unwrap();
    let addr = server.local_addr().unwrap().to_string();

    let (stop_host, host_stopped) = oneshot::channel::<()>();
    let host_events = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&host_events);
    let host_task = tokio::spawn(server.run(
        async {
            let _ = host_stopped.await;
        },
        move |host, events| {
            if events.iter().any(|e| matches!(e, HostEvent::ClientActive(_))) {
                host.submit(CommandPacket::new(CompanyId(0), 11, vec![4]))
                    .unwrap();
            }
            recorded.lock().unwrap().extend(events);
        },
    ));

    let participant = Participant::new(
        fast_config("alice"),
        Credentials::password("pw"),
        CompanyId(1),
        Counter::default(),
        content(),
    );
    let client = ParticipantClient::connect(&addr, &NoRendezvous, participant)
        .await
        .unwrap();
    let mut seen = Vec::new();
    let (participant, status) = client
        .run(tokio::time::sleep(Duration::from_millis(800)), |_, events| {
            seen.extend(events)
        })
        .await
        .unwrap();

    assert_eq!(status, RecvStatus::ClientQuit);
    assert!(seen.iter().any(|e| matches!(e, ParticipantEvent::SnapshotApplied { .. })));
    assert!(participant.frame() > 20, "only reached frame {}", participant.frame());
    assert_eq!(participant.simulation().applied.len(), 1);

    stop_host.send(()).unwrap();
    let host = tokio::time::timeout(Duration::from_secs(5), host_task)
        .await
        .expect("host should stop")
        .unwrap()
        .unwrap();
    assert_eq!(host.simulation().applied, participant.simulation().applied);

    let events = host_events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        HostEvent::ClientLeft {
            status: RecvStatus::ClientQuit,
            ..
        }
    )));
}

#[tokio::test]
async fn test_tcp_connect_refused_without_listener() {
    let participant = Participant::new(
        fast_config("nobody"),
        Credentials::default(),
        CompanyId(1),
        Counter::default(),
        content(),
    );
    // Port 1 on localhost is not listening in any sane test environment.
    let result = ParticipantClient::connect("127.0.0.1:1", &NoRendezvous, participant).await;
    assert!(result.is_err());
}
