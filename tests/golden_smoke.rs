// tests/golden_smoke.rs
use std::fs::File;
use std::process::Command;

use market_depth_engine::bus::write_frame;
use market_depth_engine::envelope::{encode_heartbeat, encode_snapshot};

#[test]
fn golden_smoke_replays_file_and_publishes() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg_path = tmp.path().join("config.yaml");
    let replay_path = tmp.path().join("feed.bin");
    let out_path = tmp.path().join("published.jsonl");

    std::fs::write(
        &cfg_path,
        r#"
processor:
  input_topic: md_in
  stats_interval_s: 1
depth_config:
  levels: [1, 2]
json_config:
  compact_format: true
topic_config:
  snapshot_topic_prefix: "market_depth."
  cdc_topic: market_depth_cdc
"#,
    )
    .unwrap();

    {
        let mut f = File::create(&replay_path).unwrap();
        let s1 = encode_snapshot(
            "AAPL",
            1,
            &[(1502500, &[(1, 600), (2, 400)]), (1502400, &[(3, 500)])],
            &[(1502600, &[(4, 800)]), (1502700, &[(5, 200)])],
            0,
            0,
        );
        // seq=2 modifies the best bid; heartbeat must be dropped silently.
        let s2 = encode_snapshot(
            "AAPL",
            2,
            &[(1502500, &[(9, 700)]), (1502400, &[(3, 500)])],
            &[(1502600, &[(4, 800)]), (1502700, &[(5, 200)])],
            1502550,
            30,
        );
        write_frame(&mut f, &s1).unwrap();
        write_frame(&mut f, &encode_heartbeat()).unwrap();
        write_frame(&mut f, &s2).unwrap();
    }

    let exe = env!("CARGO_BIN_EXE_market-depth-engine");
    let output = Command::new(exe)
        .args([
            "-c",
            cfg_path.to_str().unwrap(),
            "--file",
            replay_path.to_str().unwrap(),
            "--out",
            out_path.to_str().unwrap(),
            "--shards",
            "2",
        ])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let published = std::fs::read_to_string(&out_path).unwrap();
    let records: Vec<serde_json::Value> = published
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    // Two applies at depths 1 and 2 plus one CDC event for the modified bid.
    let snapshots: Vec<&serde_json::Value> = records
        .iter()
        .filter(|r| r["topic"] == "market_depth.AAPL")
        .collect();
    assert_eq!(snapshots.len(), 4);

    let cdc: Vec<&serde_json::Value> = records
        .iter()
        .filter(|r| r["topic"] == "market_depth_cdc")
        .collect();
    assert_eq!(cdc.len(), 1);
    assert_eq!(cdc[0]["key"], "AAPL");

    let cdc_payload: serde_json::Value =
        serde_json::from_str(cdc[0]["payload"].as_str().unwrap()).unwrap();
    assert_eq!(cdc_payload["message_type"], "cdc");
    assert_eq!(cdc_payload["event_type"], "level_modified");
    assert_eq!(cdc_payload["level"]["price"], "150.2500");
    assert_eq!(cdc_payload["level"]["quantity"], "7.00");
    assert_eq!(cdc_payload["level"]["number_of_orders"], 1);

    let snap_payload: serde_json::Value =
        serde_json::from_str(snapshots[0]["payload"].as_str().unwrap()).unwrap();
    assert_eq!(snap_payload["message_type"], "snapshot");
    assert_eq!(snap_payload["symbol"], "AAPL");
}
