//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 基于 MockSimulator 的 e2e 测试（无需仿真器）：计划 → 录制 → 归档 → 账本
//! - 断点续跑与故障注入

#[cfg(test)]
mod contract_tests {
    use contracts::{SensorKind, SequenceDescriptor, WeatherSpec};
    use std::path::Path;

    #[test]
    fn test_archive_naming_is_stable() {
        let desc = SequenceDescriptor::new(
            1234,
            "Town10HD",
            WeatherSpec::from_seed(1234),
            Path::new("/data"),
        );
        assert_eq!(desc.output_path, Path::new("/data/Town10HD_1234.npz"));
        assert_eq!(desc.output_name(), "Town10HD_1234.npz");
    }

    #[test]
    fn test_weather_is_seed_derived() {
        assert_eq!(WeatherSpec::from_seed(99), WeatherSpec::from_seed(99));
        assert!(WeatherSpec::from_seed(99).is_valid());
    }

    #[test]
    fn test_barrier_sensors() {
        assert_eq!(
            SensorKind::FRAME_SENSORS,
            [SensorKind::Lidar, SensorKind::Rgb, SensorKind::Depth]
        );
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::path::Path;

    use actor_factory::{MockConfig, MockSimulator};
    use config_loader::{ConfigLoader, ConfigFormat, SequencePlan};
    use contracts::{ContractError, GenerationConfig, SensorKind};
    use dataset_cli::{DatasetDriver, JobStats};
    use dispatcher::{ArchiveReader, ArchiveWriter, CompletionLedger};
    use tempfile::tempdir;

    const TICKS: usize = 10;
    const DT: f64 = 0.05;

    /// 0.5 s at 20 Hz after 0.1 s warm-up, tiny cameras
    fn config() -> GenerationConfig {
        let toml = r#"
            [simulation]
            tick_hz = 20.0
            duration_secs = 0.5
            warmup_secs = 0.1
            barrier_timeout_secs = 0.5
            vehicles = 4
            pedestrians = 2

            [rig.lidar]
            points_per_cloud = 128

            [rig.rgb]
            width = 16
            height = 8

            [rig.depth]
            width = 16
            height = 8

            [rig.event_camera]
            width = 16
            height = 8
        "#;
        ConfigLoader::load_from_str(toml, ConfigFormat::Toml).unwrap()
    }

    fn plan(out: &Path, table: &str) -> SequencePlan {
        SequencePlan::from_reader(table.as_bytes(), out, &config().simulation.allowed_maps)
            .unwrap()
    }

    async fn run_job(mock: MockSimulator, out: &Path, table: &str) -> Result<JobStats, ContractError> {
        let ledger = CompletionLedger::open(out).unwrap();
        let mut job = DatasetDriver::new(mock, config(), ArchiveWriter::with_level(1), ledger);
        job.run(plan(out, table)).await
    }

    fn archive_count(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".npz"))
            .count()
    }

    /// End-to-end test: SequencePlan -> SimulationDriver -> ArchiveWriter -> CompletionLedger
    ///
    /// 验证完整的数据流：
    /// 1. 三路帧流各有 N 帧，时间戳以固定步长严格递增
    /// 2. 事件包数量独立于 N
    /// 3. 账本行与归档内容一致
    #[tokio::test]
    async fn test_e2e_sequence_archive() {
        let dir = tempdir().unwrap();
        let stats = run_job(MockSimulator::new(), dir.path(), "seed;map\n100;Town02\n")
            .await
            .unwrap();
        assert_eq!(stats.completed, 1);

        let mut reader = ArchiveReader::open(dir.path().join("Town02_100.npz")).unwrap();
        for kind in SensorKind::FRAME_SENSORS {
            let times = reader.timestamps(kind).unwrap();
            assert_eq!(times.len(), TICKS, "{kind}");
            for pair in times.windows(2) {
                assert!((pair[1] - pair[0] - DT).abs() < 1e-6, "{kind}: {pair:?}");
            }
        }
        let rgb = reader.payload(SensorKind::Rgb, TICKS - 1).unwrap();
        assert_eq!(rgb.shape, vec![8, 16, 4]);
        assert_eq!(reader.lidar(0).unwrap().len(), 128);

        let event_times = reader.timestamps(SensorKind::Events).unwrap();
        assert!(event_times.windows(2).all(|p| p[0] <= p[1]));

        let rows = CompletionLedger::open(dir.path()).unwrap().rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].output_name, "Town02_100.npz");
        assert_eq!(rows[0].ticks, TICKS as u64);
        assert_eq!(rows[0].event_packets, event_times.len() as u64);
    }

    #[tokio::test]
    async fn test_depth_round_trip() {
        let dir = tempdir().unwrap();
        run_job(MockSimulator::new(), dir.path(), "seed;map\n5;Town01\n")
            .await
            .unwrap();

        let mut reader = ArchiveReader::open(dir.path().join("Town01_5.npz")).unwrap();
        let depth = reader.image(SensorKind::Depth, 3).unwrap();
        let top = contracts::decode_depth(depth.bgra_at(0, 0).unwrap());
        let bottom = contracts::decode_depth(depth.bgra_at(7, 15).unwrap());
        assert!(top > bottom);
        assert!((2.49..2.6).contains(&bottom), "bottom row depth {bottom}");
    }

    #[tokio::test]
    async fn test_resume_skips_finished_sequences() {
        let dir = tempdir().unwrap();
        let table = "seed;map\n1;Town01\n2;Town03\n3;Town05\n";

        let first = run_job(MockSimulator::new(), dir.path(), table).await.unwrap();
        assert_eq!((first.completed, first.skipped), (3, 0));

        let mock = MockSimulator::new();
        let second = run_job(mock.clone(), dir.path(), table).await.unwrap();
        assert_eq!((second.completed, second.skipped), (0, 3));
        // 全部完成时不需要仿真器
        assert_eq!(mock.connections(), 0);
        assert_eq!(CompletionLedger::open(dir.path()).unwrap().rows().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_deleted_archive_is_regenerated() {
        let dir = tempdir().unwrap();
        let table = "seed;map\n1;Town01\n2;Town01\n";
        run_job(MockSimulator::new(), dir.path(), table).await.unwrap();

        std::fs::remove_file(dir.path().join("Town01_2.npz")).unwrap();
        let stats = run_job(MockSimulator::new(), dir.path(), table).await.unwrap();
        assert_eq!((stats.completed, stats.skipped), (1, 1));
        assert!(dir.path().join("Town01_2.npz").exists());

        // append-only: the regenerated sequence has a second row
        let rows = CompletionLedger::open(dir.path()).unwrap().rows().unwrap();
        assert_eq!(rows.iter().filter(|r| r.seed == 2).count(), 2);
    }

    /// 归档已发布但行未写入 (重命名与追加之间崩溃)：下一次运行补写该行
    #[tokio::test]
    async fn test_archive_without_row_gets_row_back() {
        let dir = tempdir().unwrap();
        let table = "seed;map\n1;Town01\n2;Town01\n";
        run_job(MockSimulator::new(), dir.path(), table).await.unwrap();

        let ledger = CompletionLedger::open(dir.path()).unwrap();
        let text = std::fs::read_to_string(ledger.metadata_path()).unwrap();
        let kept: Vec<&str> = text
            .lines()
            .filter(|l| !l.starts_with("Town01_2.npz;"))
            .collect();
        std::fs::write(ledger.metadata_path(), kept.join("\n") + "\n").unwrap();
        assert_eq!(ledger.rows().unwrap().len(), 1);

        let mock = MockSimulator::new();
        let stats = run_job(mock.clone(), dir.path(), table).await.unwrap();
        assert_eq!((stats.skipped, stats.backfilled, stats.completed), (2, 1, 0));
        assert_eq!(mock.connections(), 0);

        let rows = ledger.rows().unwrap();
        assert_eq!(rows.len(), 2);
        let restored = rows.iter().find(|r| r.output_name == "Town01_2.npz").unwrap();
        assert_eq!(restored.ticks, TICKS as u64);
        assert_eq!(restored.rgb_frames, TICKS as u64);
    }

    #[tokio::test]
    async fn test_crash_is_isolated_and_retried() {
        let dir = tempdir().unwrap();
        let table = "seed;map\n1;Town01\n2;Town01\n3;Town01\n";
        let mock = MockSimulator::with_config(MockConfig {
            disconnect_at: HashMap::from([(2, 5)]),
            ..Default::default()
        });

        let stats = run_job(mock.clone(), dir.path(), table).await.unwrap();
        assert_eq!((stats.completed, stats.failed), (2, 1));
        assert_eq!(stats.metrics.failures.get("connection_lost"), Some(&1));
        // seed 3 ran on a fresh connection
        assert_eq!(mock.connections(), 2);
        assert!(!dir.path().join("Town01_2.npz").exists());
        assert_eq!(archive_count(dir.path()), 2);

        let rerun = run_job(mock, dir.path(), table).await.unwrap();
        assert_eq!((rerun.completed, rerun.skipped), (1, 2));
        assert_eq!(archive_count(dir.path()), 3);
    }

    #[tokio::test]
    async fn test_stalled_sensor_times_out() {
        let dir = tempdir().unwrap();
        let mock = MockSimulator::with_config(MockConfig {
            stall_at: HashMap::from([(9, (SensorKind::Rgb, 6))]),
            ..Default::default()
        });

        let stats = run_job(mock.clone(), dir.path(), "seed;map\n9;Town04\n")
            .await
            .unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.metrics.failures.get("timeout"), Some(&1));
        assert_eq!(archive_count(dir.path()), 0);
        assert!(CompletionLedger::open(dir.path()).unwrap().rows().unwrap().is_empty());
        assert_eq!(mock.actor_count(), 0);
    }

    #[tokio::test]
    async fn test_desync_discards_sequence() {
        let dir = tempdir().unwrap();
        let mock = MockSimulator::with_config(MockConfig {
            duplicate_at: HashMap::from([(4, (SensorKind::Lidar, 7))]),
            ..Default::default()
        });

        let stats = run_job(mock, dir.path(), "seed;map\n4;Town01\n5;Town01\n")
            .await
            .unwrap();
        assert_eq!((stats.completed, stats.failed), (1, 1));
        assert_eq!(stats.metrics.failures.get("frame_desync"), Some(&1));
        assert!(!dir.path().join("Town01_4.npz").exists());
    }

    #[tokio::test]
    async fn test_no_valid_rows_is_not_an_error() {
        let dir = tempdir().unwrap();
        let mock = MockSimulator::new();
        let stats = run_job(mock.clone(), dir.path(), "seed;map\nabc;Town01\n7;Narnia\n")
            .await
            .unwrap();
        assert_eq!(stats.planned, 0);
        assert_eq!(stats.rejected_rows, 2);
        assert!(stats.is_complete());
        assert_eq!(mock.connections(), 0);
        assert!(CompletionLedger::open(dir.path()).unwrap().rows().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_simulator_is_fatal() {
        let dir = tempdir().unwrap();
        let mock = MockSimulator::with_config(MockConfig {
            refuse_connects: u32::MAX,
            ..Default::default()
        });
        let err = run_job(mock, dir.path(), "seed;map\n1;Town01\n")
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::SimulatorConnectionLost { .. }));
        assert_eq!(archive_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_frame_content_is_seed_deterministic() {
        let (a, b) = (tempdir().unwrap(), tempdir().unwrap());
        for dir in [&a, &b] {
            run_job(MockSimulator::new(), dir.path(), "seed;map\n77;Town07\n")
                .await
                .unwrap();
        }

        let mut ra = ArchiveReader::open(a.path().join("Town07_77.npz")).unwrap();
        let mut rb = ArchiveReader::open(b.path().join("Town07_77.npz")).unwrap();
        assert_eq!(ra.lidar(4).unwrap(), rb.lidar(4).unwrap());
        assert_eq!(
            ra.payload(SensorKind::Rgb, 2).unwrap(),
            rb.payload(SensorKind::Rgb, 2).unwrap()
        );
    }
}
