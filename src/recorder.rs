// ===============================
// src/recorder.rs
// ===============================
//
// JSONL journal of everything that crosses the core's boundary:
// inbound heartbeats, outbound responses/disconnects, executions and
// closed trades. One `Event` per line, appended.
// - BufWriter, flushed every second or every 1000 events.
// - Parent directory created on open.
// - On a failed write the file is reopened and the line retried once.
//
// ENV: `RECORD_FILE=/path/to/events.jsonl` enables it (see main.rs).
//
use std::io;
use std::path::Path;

use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

async fn open_writer(path: &str) -> io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<File>, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, recording disabled");
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let line = match serde_json::to_string(&ev) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip event");
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(?e, "recorder: write failed, reopening");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e2) => {
                            error!(?e2, "recorder: reopen failed, drop event");
                            continue;
                        }
                    }
                    if let Err(e2) = write_line(&mut writer, &line).await {
                        error!(?e2, "recorder: write failed again after reopen, drop event");
                        continue;
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Heartbeat, OutboundEvent};

    #[tokio::test]
    async fn writes_one_json_line_per_event() {
        let dir = std::env::temp_dir().join(format!("recorder-test-{}", std::process::id()));
        let path = dir.join("nested").join("events.jsonl");
        let path_str = path.to_string_lossy().to_string();
        let _ = std::fs::remove_dir_all(&dir);

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run(rx, path_str.clone()));
        tx.send(Event::Note("boot".into())).await.unwrap();
        tx.send(Event::Outbound(OutboundEvent::ApplicationDisconnect("md-engine".into()))).await.unwrap();
        tx.send(Event::HeartbeatIn(Heartbeat {
            application_id: "oe-engine".into(),
            heartbeat_interval_ms: 1_000,
            reply_to: "oe.inbox".into(),
        }))
        .await
        .unwrap();
        drop(tx);
        task.await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: Event = serde_json::from_str(lines[0]).unwrap();
        assert!(matches!(first, Event::Note(ref n) if n == "boot"));
        assert!(lines[1].contains("md-engine"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
