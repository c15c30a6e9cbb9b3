use sigcarve::{ScanEngine, ScanSettings, ScanStatus};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A minimal JPEG-shaped buffer: start marker, ten payload bytes carrying a
/// spurious thumbnail end marker at offset 5, then the real end marker.
fn jpeg_with_thumbnail() -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE1];
    data.extend_from_slice(&[0x01, 0xFF, 0xD9, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

fn small_gif() -> Vec<u8> {
    vec![0x47, 0x49, 0x46, 0x38, 0x61, 0x01, 0x02, 0x00, 0x3B]
}

fn setup(sources: &[&[u8]]) -> (TempDir, ScanSettings) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut settings = ScanSettings::default();
    settings.dest_folder = dir.path().join("out");
    for (i, data) in sources.iter().enumerate() {
        let path = dir.path().join(format!("source_{i}.img"));
        fs::write(&path, data).unwrap();
        settings.source_files.push(path);
    }
    (dir, settings)
}

fn run_all(settings: ScanSettings) -> Arc<ScanStatus> {
    let status = Arc::new(ScanStatus::new(settings));
    let mut engine = ScanEngine::new(Arc::clone(&status));
    while status.has_more_source_files() {
        engine.init().unwrap();
        engine.scan().unwrap();
    }
    status
}

fn out_files(out: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn jpeg_skips_thumbnail_end_marker() {
    let data = jpeg_with_thumbnail();
    let (dir, settings) = setup(&[&data]);
    let out = settings.dest_folder.clone();
    let status = run_all(settings);

    assert_eq!(out_files(&out), ["JPEG_00001.jpeg"]);
    // the spurious end marker at offset 5 was skipped; the carve spans the
    // whole buffer up to and including the real end marker
    assert_eq!(fs::read(out.join("JPEG_00001.jpeg")).unwrap(), data);

    let snap = status.snapshot();
    assert_eq!(snap.found_overall, 1);
    assert_eq!(snap.total_counts.get("JPEG"), Some(&1));
    drop(dir);
}

#[test]
fn gif_round_trip() {
    let data = small_gif();
    let (_dir, settings) = setup(&[&data]);
    let out = settings.dest_folder.clone();
    run_all(settings);

    assert_eq!(out_files(&out), ["GIF_00001.gif"]);
    assert_eq!(fs::read(out.join("GIF_00001.gif")).unwrap(), data);
}

#[test]
fn embedded_size_carve_does_not_skip_the_stream() {
    // a 64-byte RIFF/WAVE container with a GIF buried in its payload; the
    // scan must resume right after the WAVE match and still find the GIF
    let mut data = vec![0x11u8; 64];
    data[0..4].copy_from_slice(&[0x52, 0x49, 0x46, 0x46]);
    data[4..8].copy_from_slice(&56u32.to_le_bytes());
    let gif = small_gif();
    data[20..20 + gif.len()].copy_from_slice(&gif);

    let (_dir, settings) = setup(&[&data]);
    let out = settings.dest_folder.clone();
    let status = run_all(settings);

    assert_eq!(out_files(&out), ["GIF_00001.gif", "WAVE_00001.wav"]);
    // accumulated size 56 plus the RIFF correction of 8
    assert_eq!(fs::read(out.join("WAVE_00001.wav")).unwrap(), data);
    assert_eq!(fs::read(out.join("GIF_00001.gif")).unwrap(), gif);
    assert_eq!(status.snapshot().found_overall, 2);
}

#[test]
fn counters_continue_across_source_files() {
    let gif = small_gif();
    let (_dir, settings) = setup(&[&gif, &gif]);
    let out = settings.dest_folder.clone();
    let status = run_all(settings);

    assert_eq!(out_files(&out), ["GIF_00001.gif", "GIF_00002.gif"]);

    let snap = status.snapshot();
    assert_eq!(snap.source_files_finished, 2);
    assert_eq!(snap.completed.len(), 2);
    assert_eq!(snap.completed[0].counts.get("GIF"), Some(&1));
    assert_eq!(snap.completed[1].counts.get("GIF"), Some(&1));
    assert_eq!(snap.total_counts.get("GIF"), Some(&2));
}

#[test]
fn empty_source_finishes_cleanly() {
    let (_dir, settings) = setup(&[&[]]);
    let out = settings.dest_folder.clone();
    let status = run_all(settings);

    let snap = status.snapshot();
    assert_eq!(snap.source_files_finished, 1);
    assert_eq!(snap.completed[0].found, 0);
    assert!(snap.completed[0].counts.values().all(|&c| c == 0));
    assert_eq!(snap.current_progress, 0);
    assert!(out_files(&out).is_empty());
}

#[test]
fn disabling_is_per_execution() {
    let mut data = jpeg_with_thumbnail();
    data.extend_from_slice(&small_gif());

    let (_dir, mut settings) = setup(&[&data]);
    let out = settings.dest_folder.clone();
    settings.disabled_signatures = vec!["JPEG".into()];

    // first execution: JPEG disabled, only the GIF comes out
    let first = run_all(settings.clone());
    assert_eq!(out_files(&out), ["GIF_00001.gif"]);
    assert!(!first.snapshot().total_counts.contains_key("JPEG"));

    // second execution from the same registry, nothing disabled: the JPEG
    // is found, so the first run's disable did not touch the table
    settings.disabled_signatures.clear();
    settings.dest_folder = out.parent().unwrap().join("out2");
    let second = run_all(settings);
    let snap = second.snapshot();
    assert_eq!(snap.total_counts.get("JPEG"), Some(&1));
    assert_eq!(snap.total_counts.get("GIF"), Some(&1));
}

#[test]
fn scan_window_excludes_bytes_before_start() {
    // two GIFs; the scan window starts past the first one
    let gif = small_gif();
    let mut data = gif.clone();
    data.extend_from_slice(&[0xAA; 11]);
    data.extend_from_slice(&gif);

    let (_dir, settings) = setup(&[&data]);
    let out = settings.dest_folder.clone();
    let status = Arc::new(ScanStatus::new(settings));
    status.set_scan_window(Some(4), None);

    let mut engine = ScanEngine::new(Arc::clone(&status));
    engine.init().unwrap();
    engine.scan().unwrap();

    assert_eq!(out_files(&out), ["GIF_00001.gif"]);
    assert_eq!(fs::read(out.join("GIF_00001.gif")).unwrap(), gif);
}

#[test]
fn crw_end_resolved_by_injected_resolver() {
    let marker_pos = 40;
    let mut data = vec![0xAAu8; 80];
    data[0..14].copy_from_slice(&[
        0x49, 0x49, 0x1A, 0x00, 0x00, 0x00, 0x48, 0x45, 0x41, 0x50, 0x43, 0x43, 0x44, 0x52,
    ]);
    data[marker_pos..marker_pos + 4].copy_from_slice(&[0x03, 0x00, 0x05, 0x20]);
    data[marker_pos + 7..marker_pos + 12].copy_from_slice(&[0x00; 5]);
    data[marker_pos + 12..marker_pos + 14].copy_from_slice(&[0x07, 0x20]);
    data[marker_pos + 22..marker_pos + 24].copy_from_slice(&[0x0A, 0x30]);

    let (_dir, settings) = setup(&[&data]);
    let out = settings.dest_folder.clone();
    run_all(settings);

    assert_eq!(out_files(&out), ["CRW_00001.crw"]);
    // resolver reports the end 35 bytes past the directory marker
    assert_eq!(
        fs::read(out.join("CRW_00001.crw")).unwrap(),
        data[..=marker_pos + 35]
    );
}

#[test]
fn crw_without_directory_block_is_dropped() {
    let mut data = vec![0xAAu8; 60];
    data[0..14].copy_from_slice(&[
        0x49, 0x49, 0x1A, 0x00, 0x00, 0x00, 0x48, 0x45, 0x41, 0x50, 0x43, 0x43, 0x44, 0x52,
    ]);

    let (_dir, settings) = setup(&[&data]);
    let out = settings.dest_folder.clone();
    let status = run_all(settings);

    assert!(out_files(&out).is_empty());
    assert_eq!(status.snapshot().found_overall, 0);
}

#[test]
fn unreadable_size_bytes_drop_the_candidate() {
    // "RIFF" at the very end of the file; the size bytes are past EOF
    let data = [0x00, 0x00, 0x52, 0x49, 0x46, 0x46];
    let (_dir, settings) = setup(&[&data]);
    let out = settings.dest_folder.clone();
    let status = run_all(settings);

    let snap = status.snapshot();
    assert_eq!(snap.found_overall, 0);
    assert!(snap.completed[0].write_errors.is_empty());
    assert!(out_files(&out).is_empty());
}

#[test]
fn size_field_past_eof_is_a_recorded_write_failure() {
    let mut data = vec![0x22u8; 16];
    data[0..4].copy_from_slice(&[0x52, 0x49, 0x46, 0x46]);
    // claims 0x01000000 bytes of payload in a 16-byte file
    data[4..8].copy_from_slice(&[0x00, 0x00, 0x00, 0x01]);

    let (_dir, settings) = setup(&[&data]);
    let out = settings.dest_folder.clone();
    let status = run_all(settings);

    let snap = status.snapshot();
    assert_eq!(snap.found_overall, 0);
    assert_eq!(snap.completed[0].write_errors.len(), 1);
    assert!(snap.completed[0].write_errors[0].contains("WAVE"));
    assert!(out_files(&out).is_empty());
}

#[cfg(unix)]
#[test]
fn carve_write_failure_does_not_abort_the_scan() {
    use std::os::unix::fs::PermissionsExt;

    // two GIFs in one source; the destination is read-only so both writes
    // fail, yet the scan runs to completion and reports both failures
    let gif = small_gif();
    let mut data = gif.clone();
    data.extend_from_slice(&[0x55; 7]);
    data.extend_from_slice(&gif);

    let (dir, settings) = setup(&[&data]);
    let out = settings.dest_folder.clone();
    fs::create_dir_all(&out).unwrap();
    fs::set_permissions(&out, fs::Permissions::from_mode(0o555)).unwrap();

    let status = run_all(settings);

    let snap = status.snapshot();
    assert_eq!(snap.found_overall, 0);
    assert_eq!(snap.completed[0].counts.get("GIF"), Some(&0));
    assert_eq!(snap.completed[0].write_errors.len(), 2);

    fs::set_permissions(&out, fs::Permissions::from_mode(0o755)).unwrap();
    drop(dir);
}

#[test]
fn cancellation_stops_the_pass_and_finalizes_the_file() {
    let mut data = vec![0u8; 256 * 1024];
    let gif = small_gif();
    let tail = data.len() - gif.len();
    data[tail..].copy_from_slice(&gif);

    let (_dir, settings) = setup(&[&data]);
    let out = settings.dest_folder.clone();
    let status = Arc::new(ScanStatus::new(settings));
    status.request_cancel();

    let mut engine = ScanEngine::new(Arc::clone(&status));
    engine.init().unwrap();
    engine.scan().unwrap();

    let snap = status.snapshot();
    assert!(snap.cancelled);
    assert_eq!(snap.source_files_finished, 1);
    assert_eq!(snap.found_overall, 0);
    assert!(out_files(&out).is_empty());
}

#[test]
fn cancellation_from_a_polling_thread() {
    let data = vec![0u8; 4 * 1024 * 1024];
    let (_dir, settings) = setup(&[&data]);
    let status = Arc::new(ScanStatus::new(settings));

    let poller = {
        let status = Arc::clone(&status);
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            let _ = status.snapshot();
            status.request_cancel();
        })
    };

    let mut engine = ScanEngine::new(Arc::clone(&status));
    engine.init().unwrap();
    engine.scan().unwrap();
    poller.join().unwrap();

    let snap = status.snapshot();
    assert_eq!(snap.source_files_finished, 1);
    assert_eq!(snap.completed.len(), 1);
}

#[test]
fn missing_source_file_is_reported_per_file() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut settings = ScanSettings::default();
    settings.dest_folder = dir.path().join("out");
    settings.source_files = vec![dir.path().join("does_not_exist.img")];

    let status = Arc::new(ScanStatus::new(settings));
    let mut engine = ScanEngine::new(Arc::clone(&status));
    let err = engine.init().unwrap_err();
    assert!(matches!(err, sigcarve::CarveError::SourceIo { .. }));
}

#[test]
fn caller_can_skip_a_missing_source_file() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let gif = small_gif();
    let good = dir.path().join("good.img");
    fs::write(&good, &gif).unwrap();

    let mut settings = ScanSettings::default();
    settings.dest_folder = dir.path().join("out");
    settings.source_files = vec![dir.path().join("missing.img"), good];
    let out = settings.dest_folder.clone();

    let status = Arc::new(ScanStatus::new(settings));
    let mut engine = ScanEngine::new(Arc::clone(&status));
    while status.has_more_source_files() {
        match engine.init() {
            Ok(()) => engine.scan().unwrap(),
            Err(_) => status.skip_source_file(),
        }
    }

    assert_eq!(out_files(&out), ["GIF_00001.gif"]);
    let snap = status.snapshot();
    assert_eq!(snap.source_files_finished, 2);
    assert_eq!(snap.completed[0].found, 0);
    assert_eq!(snap.completed[1].found, 1);
}

#[test]
fn validation_failure_surfaces_before_any_file_is_opened() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut settings = ScanSettings::default();
    settings.dest_folder = dir.path().join("out");
    settings.signatures[0].name = "  ".into();
    // the source list is deliberately empty: validation must fail first
    let status = Arc::new(ScanStatus::new(settings));
    let mut engine = ScanEngine::new(Arc::clone(&status));
    let err = engine.init().unwrap_err();
    assert!(matches!(err, sigcarve::CarveError::EmptyName));
}
