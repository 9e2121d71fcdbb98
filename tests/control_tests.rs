//! Control-plane behavior: cadence changes, stats stream, topology
//! publication, and the producer surface.

use flipdisc_core::{
    Canvas, DisplayConfig, Orientation, Panel, Point, RefreshMode, SerialSettings,
    SupervisorSettings,
};
use flipdisc_ingest::IngestOutcome;
use flipdisc_proto::{Bitmap, RbmFrame};
use flipdisc_serial::MockTransport;
use flipdisc_server::Server;
use std::sync::Arc;
use std::time::Duration;

const PRODUCER: &str = "orchestrator";

fn two_panel_display(fps: u8) -> DisplayConfig {
    DisplayConfig {
        canvas: Canvas::new(28, 14),
        fps,
        fps_max: 30,
        buffer_ms: 500,
        frame_gap_ms: 0,
        write_timeout_ms: 250,
        refresh: RefreshMode::Instant,
        panels: vec![
            Panel {
                id: "top".to_string(),
                address: 1,
                origin: Point { x: 0, y: 0 },
                width: 28,
                height: 7,
                orientation: Orientation::Normal,
            },
            Panel {
                id: "bottom".to_string(),
                address: 2,
                origin: Point { x: 0, y: 7 },
                width: 28,
                height: 7,
                orientation: Orientation::Normal,
            },
        ],
        serial: SerialSettings::default(),
        supervisor: SupervisorSettings::default(),
    }
}

async fn build(config: &DisplayConfig) -> (Server, Arc<MockTransport>) {
    let bus = MockTransport::new("mock0");
    let server = Server::build(config, bus.clone()).await.unwrap();
    (server, bus)
}

fn frame_bytes(seq: u32, pixel: (u16, u16)) -> Vec<u8> {
    let mut bitmap = Bitmap::zero(28, 14);
    bitmap.set(pixel.0, pixel.1, true);
    RbmFrame::new(28, 14, seq, 0, 0, bitmap.rows().to_vec())
        .unwrap()
        .encode()
}

#[tokio::test(start_paused = true)]
async fn test_set_fps_resizes_buffer_and_rewrites_duration() {
    let config = two_panel_display(15);
    let (server, _bus) = build(&config).await;
    server
        .control
        .set_active_source(Some(PRODUCER.to_string()))
        .await;
    assert_eq!(server.buffer.capacity().await, 8);

    let effective = server.control.set_fps(10).await.unwrap();
    assert_eq!(effective, 10);
    assert_eq!(server.buffer.capacity().await, 5);

    // Forwarded headers now carry the new cadence.
    server
        .forwarder
        .submit(PRODUCER, frame_bytes(1, (0, 0)))
        .await
        .unwrap();
    let entry = server.buffer.pop().await.unwrap();
    assert_eq!(entry.frame.duration_ms, 100);
}

#[tokio::test(start_paused = true)]
async fn test_set_fps_same_value_is_noop() {
    let config = two_panel_display(15);
    let (mut server, bus) = build(&config).await;
    server.start().await.unwrap();
    let ticks = Duration::from_millis(67 * 3);
    tokio::time::sleep(ticks).await;
    bus.take_writes().await;

    // Entries survive, no cache invalidation, no repaint.
    server
        .control
        .set_active_source(Some(PRODUCER.to_string()))
        .await;
    server
        .forwarder
        .submit(PRODUCER, frame_bytes(1, (0, 0)))
        .await
        .unwrap();
    let effective = server.control.set_fps(15).await.unwrap();
    assert_eq!(effective, 15);
    assert_eq!(server.buffer.capacity().await, 8);

    tokio::time::sleep(ticks).await;
    let writes = bus.take_writes().await;
    assert_eq!(writes.len(), 1, "only the dirty top panel repaints");

    server.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_set_fps_clamps_to_limits() {
    let config = two_panel_display(15);
    let (server, _bus) = build(&config).await;

    assert_eq!(server.control.set_fps(200).await.unwrap(), 30);
    assert_eq!(server.control.set_fps(0).await.unwrap(), 1);
    assert_eq!(server.control.fps().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_active_source_gates_buffering() {
    let config = two_panel_display(15);
    let (server, _bus) = build(&config).await;

    let outcome = server
        .forwarder
        .submit(PRODUCER, frame_bytes(0, (0, 0)))
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Observed { .. }));
    assert_eq!(server.buffer.occupancy(), 0);

    server
        .control
        .set_active_source(Some(PRODUCER.to_string()))
        .await;
    assert_eq!(
        server.control.active_source().await.as_deref(),
        Some(PRODUCER)
    );

    let outcome = server
        .forwarder
        .submit(PRODUCER, frame_bytes(1, (0, 0)))
        .await
        .unwrap();
    assert!(outcome.forwarded());

    // Clearing the source returns the producer to observed-only.
    server.control.set_active_source(None).await;
    let outcome = server
        .forwarder
        .submit(PRODUCER, frame_bytes(2, (1, 0)))
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Observed { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_stats_stream_emits_periodically_and_on_change() {
    let config = two_panel_display(15);
    let (mut server, _bus) = build(&config).await;
    let mut stream = server.control.subscribe();
    server.start().await.unwrap();

    // Periodic snapshot within the one-second cadence.
    let snapshot = tokio::time::timeout(Duration::from_millis(1_100), stream.recv())
        .await
        .expect("periodic snapshot due")
        .unwrap();
    assert_eq!(snapshot.fps, 15);

    // An fps change pushes an extra snapshot well before the next second.
    server.control.set_fps(10).await.unwrap();
    let snapshot = tokio::time::timeout(Duration::from_millis(200), stream.recv())
        .await
        .expect("edge-triggered snapshot due")
        .unwrap();
    assert_eq!(snapshot.fps, 10);

    server.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stats_stream_reports_degraded_transition() {
    let config = two_panel_display(10);
    let (mut server, bus) = build(&config).await;
    server.start().await.unwrap();
    server
        .control
        .set_active_source(Some(PRODUCER.to_string()))
        .await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let mut stream = server.control.subscribe();
    bus.fail_next_permanent().await;
    server
        .forwarder
        .submit(PRODUCER, frame_bytes(1, (3, 1)))
        .await
        .unwrap();

    // The degraded edge arrives ahead of the periodic cadence.
    let mut saw_degraded = false;
    for _ in 0..4 {
        let snapshot = tokio::time::timeout(Duration::from_millis(400), stream.recv())
            .await
            .expect("snapshot due")
            .unwrap();
        if snapshot.degraded {
            saw_degraded = true;
            break;
        }
    }
    assert!(saw_degraded);

    server.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_publish_topology_forces_repaint() {
    let config = two_panel_display(10);
    let (mut server, bus) = build(&config).await;
    server.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    bus.take_writes().await;

    server
        .control
        .publish_topology(config.panels.clone(), RefreshMode::Instant)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let writes = bus.take_writes().await;
    assert_eq!(writes.len(), 2, "all panels rewritten after publication");

    server.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_publish_topology_rejects_invalid_layout() {
    let config = two_panel_display(10);
    let (server, _bus) = build(&config).await;

    let mut panels = config.panels.clone();
    panels[1].address = panels[0].address;
    let err = server
        .control
        .publish_topology(panels, RefreshMode::Instant)
        .await
        .unwrap_err();
    assert!(err.message.contains("share address"));
}

#[tokio::test(start_paused = true)]
async fn test_demo_worker_feeds_pipeline_and_reports() {
    let config = two_panel_display(10);
    let (mut server, bus) = build(&config).await;
    server.start().await.unwrap();
    server
        .add_demo_worker("blink", Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(
        server.control.active_source().await.as_deref(),
        Some("blink")
    );

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let snapshot = server.control.snapshot().await;
    assert!(snapshot.received >= 4);
    assert!(snapshot.forwarded >= 3);
    assert!(bus.write_count().await >= 4, "checkerboard keeps panels dirty");

    let producers = server.control.producers().await;
    assert_eq!(producers.len(), 1);
    assert_eq!(producers[0].id, "blink");

    server.shutdown().await;
    // Explicit stop cleared the worker's record.
    assert!(server.control.producers().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_capabilities_declare_invert_support() {
    let config = two_panel_display(10);
    let (server, _bus) = build(&config).await;
    assert!(server.control.capabilities().invert_flag);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_surfaces_retry_after_in_outcome() {
    let config = two_panel_display(2);
    let (server, _bus) = build(&config).await;
    server
        .control
        .set_active_source(Some(PRODUCER.to_string()))
        .await;
    server.control.apply_cooldown(1_000).await;

    // Exhaust the fps=2 bucket, then observe the advertised window.
    server
        .forwarder
        .submit(PRODUCER, frame_bytes(0, (0, 0)))
        .await
        .unwrap();
    server
        .forwarder
        .submit(PRODUCER, frame_bytes(1, (1, 0)))
        .await
        .unwrap();
    match server
        .forwarder
        .submit(PRODUCER, frame_bytes(2, (2, 0)))
        .await
        .unwrap()
    {
        IngestOutcome::NoToken { retry_after_ms, .. } => {
            assert!(retry_after_ms.unwrap_or(0) > 0);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}
