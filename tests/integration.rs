//! Integration tests for the Seisho crate.
//!
//! These tests run whole productions from a synthetic source tree to
//! packaged volumes, using a recording packager where no real converter is
//! available.

use seisho::enhance::Denoiser;
use seisho::enhance::capability::Sauvola;
use seisho::error::{Error, Result};
use seisho::prelude::*;
use tokio::sync::mpsc;
use tokio::time::timeout;

mod common;
use common::{
    LONG_TEST_TIMEOUT, RecordingPackager, TestDirs, create_chapter, create_corrupt_page,
    create_page, file_names, read_zip_entry, setup_test_dirs, zip_entry_names,
};

fn config_for(dirs: &TestDirs) -> ProductionConfigBuilder {
    let mut builder = ProductionConfig::builder();
    builder
        .series_title("Test Series")
        .source_path(dirs.source_dir.clone())
        .work_dir(dirs.work_dir.clone());
    builder
}

async fn chapters_of(config: &ProductionConfig) -> Result<ChapterList> {
    Ok(config.scan().await?.chapters)
}

#[tokio::test]
async fn test_one_chapter_per_volume() -> Result<()> {
    let dirs = setup_test_dirs("one_chapter_per_volume").await;
    create_chapter(&dirs.source_dir.join("Chapter 1"), 3).await?;
    create_chapter(&dirs.source_dir.join("Chapter 10"), 2).await?;

    let config = config_for(&dirs).group_size(1u32).build()?;
    let chapters = chapters_of(&config).await?;
    let packager = Arc::new(RecordingPackager::default());
    let production = Production::new(config.clone()).with_packager(packager.clone());

    let summary = timeout(LONG_TEST_TIMEOUT, production.run(&chapters))
        .await
        .expect("Test timed out")?;

    assert_eq!(summary.volumes_planned, 2);
    assert_eq!(summary.volumes_produced, 2);
    assert!(!summary.cancelled);
    assert_eq!(
        file_names(&config.volume_dir(1)).await,
        vec!["00001.jpg", "00002.jpg", "00003.jpg"]
    );
    assert_eq!(
        file_names(&config.volume_dir(2)).await,
        vec!["00001.jpg", "00002.jpg"]
    );

    let titles: Vec<String> = packager.requests().iter().map(|r| r.title()).collect();
    assert_eq!(titles, vec!["Test Series - v01", "Test Series - v02"]);
    let ebooks = config.ebooks_dir();
    assert!(packager.requests().iter().all(|r| r.output_dir == ebooks));
    assert!(config.ebooks_dir().join("Test Series - v02.cbz").exists());
    Ok(())
}

#[tokio::test]
async fn test_start_volume_and_grouping() -> Result<()> {
    let dirs = setup_test_dirs("start_volume").await;
    for i in 1..=5 {
        create_chapter(&dirs.source_dir.join(format!("Chapter {}", i)), 1).await?;
    }

    let config = config_for(&dirs)
        .group_size(2u32)
        .start_volume(4u32)
        .build()?;
    let chapters = chapters_of(&config).await?;
    let packager = Arc::new(RecordingPackager::default());
    let summary = Production::new(config.clone())
        .with_packager(packager.clone())
        .run(&chapters)
        .await?;

    let numbers: Vec<u32> = summary.outcomes.iter().map(|o| o.number).collect();
    assert_eq!(numbers, vec![4, 5, 6]);
    let pages: Vec<usize> = summary.outcomes.iter().map(|o| o.pages_written).collect();
    assert_eq!(pages, vec![2, 2, 1]);
    assert!(config.volume_dir(6).join("00001.jpg").exists());
    Ok(())
}

#[tokio::test]
async fn test_no_enabled_chapter_is_a_precondition_failure() -> Result<()> {
    let dirs = setup_test_dirs("no_enabled_chapter").await;
    create_chapter(&dirs.source_dir.join("Chapter 1"), 1).await?;

    let config = config_for(&dirs).build()?;
    let mut chapters = chapters_of(&config).await?;
    chapters.toggle_chapter(0);

    let packager = Arc::new(RecordingPackager::default());
    let result = Production::new(config.clone())
        .with_packager(packager.clone())
        .run(&chapters)
        .await;

    assert!(matches!(result, Err(Error::Precondition(_))));
    assert!(
        !dirs.work_dir.exists(),
        "no directory may be created before preconditions pass"
    );
    assert!(packager.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_source_is_a_precondition_failure() -> Result<()> {
    let dirs = setup_test_dirs("missing_source").await;
    let config = ProductionConfig::builder()
        .series_title("Ghost")
        .source_path(dirs.root.join("nowhere"))
        .work_dir(dirs.work_dir.clone())
        .build()?;
    let chapters = ChapterList::new(vec![Chapter::new(
        "Chapter 1",
        dirs.root.join("nowhere"),
        vec![dirs.root.join("nowhere/001.jpg")],
    )]);

    let result = Production::new(config).run(&chapters).await;
    assert!(matches!(result, Err(Error::Precondition(_))));
    assert!(!dirs.work_dir.exists());
    Ok(())
}

#[tokio::test]
async fn test_unreadable_page_leaves_a_sequence_gap() -> Result<()> {
    let dirs = setup_test_dirs("sequence_gap").await;
    let chapter = dirs.source_dir.join("Chapter 1");
    create_page(&chapter.join("001.jpg")).await?;
    create_corrupt_page(&chapter.join("002.jpg")).await?;
    create_page(&chapter.join("003.jpg")).await?;

    let config = config_for(&dirs).build()?;
    let chapters = chapters_of(&config).await?;
    let summary = Production::new(config.clone())
        .with_packager(Arc::new(RecordingPackager::default()))
        .run(&chapters)
        .await?;

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.pages_attempted, 3);
    assert_eq!(outcome.pages_written, 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].sequence, 2);
    assert!(outcome.failures[0].source.ends_with("002.jpg"));
    assert!(matches!(outcome.status, VolumeStatus::Packaged(_)));
    assert_eq!(
        file_names(&config.volume_dir(1)).await,
        vec!["00001.jpg", "00003.jpg"]
    );
    Ok(())
}

#[tokio::test]
async fn test_volume_without_any_written_page_is_not_packaged() -> Result<()> {
    let dirs = setup_test_dirs("all_pages_fail").await;
    create_corrupt_page(&dirs.source_dir.join("Chapter 1").join("001.jpg")).await?;
    create_chapter(&dirs.source_dir.join("Chapter 2"), 1).await?;

    let config = config_for(&dirs).group_size(1u32).build()?;
    let chapters = chapters_of(&config).await?;
    let packager = Arc::new(RecordingPackager::default());
    let summary = Production::new(config)
        .with_packager(packager.clone())
        .run(&chapters)
        .await?;

    assert_eq!(summary.volumes_produced, 1);
    assert_eq!(summary.failed_volumes().count(), 1);
    assert!(matches!(summary.outcomes[0].status, VolumeStatus::Failed(_)));
    let packaged: Vec<u32> = packager.requests().iter().map(|r| r.volume).collect();
    assert_eq!(packaged, vec![2]);
    Ok(())
}

#[tokio::test]
async fn test_packaging_failure_does_not_stop_the_run() -> Result<()> {
    let dirs = setup_test_dirs("packaging_failure").await;
    for i in 1..=3 {
        create_chapter(&dirs.source_dir.join(format!("Chapter {}", i)), 1).await?;
    }

    let config = config_for(&dirs).group_size(1u32).build()?;
    let chapters = chapters_of(&config).await?;
    let packager = Arc::new(RecordingPackager::failing(&[2]));
    let summary = Production::new(config)
        .with_packager(packager.clone())
        .run(&chapters)
        .await?;

    assert_eq!(summary.volumes_planned, 3);
    assert_eq!(summary.volumes_produced, 2);
    assert_eq!(packager.requests().len(), 3);
    match &summary.outcomes[1].status {
        VolumeStatus::Failed(reason) => assert!(reason.contains("refused")),
        other => panic!("unexpected status {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_run_streams_progress_events() -> Result<()> {
    let dirs = setup_test_dirs("progress_events").await;
    create_chapter(&dirs.source_dir.join("Chapter 1"), 2).await?;
    create_chapter(&dirs.source_dir.join("Chapter 2"), 1).await?;

    let config = config_for(&dirs).group_size(1u32).build()?;
    let chapters = chapters_of(&config).await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    Production::new(config)
        .with_packager(Arc::new(RecordingPackager::default()))
        .with_events(tx)
        .run(&chapters)
        .await?;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.first(), Some(&RunEvent::Started { volumes: 2 }));
    assert_eq!(
        events.last(),
        Some(&RunEvent::Finished {
            produced: 2,
            planned: 2,
            cancelled: false
        })
    );
    let written = events
        .iter()
        .filter(|e| matches!(e, RunEvent::PageWritten { .. }))
        .count();
    assert_eq!(written, 3);
    let started = RunEvent::VolumeStarted {
        number: 1,
        pages: 2,
    };
    assert!(events.contains(&started));
    Ok(())
}

#[tokio::test]
async fn test_clean_flags_control_workspace_wipe() -> Result<()> {
    let dirs = setup_test_dirs("clean_flags").await;
    create_chapter(&dirs.source_dir.join("Chapter 1"), 1).await?;
    let keep = dirs.work_dir.join("ebooks").join("keep.txt");
    let stale = dirs.work_dir.join("temp").join("vol_09").join("00001.jpg");
    tokio::fs::create_dir_all(keep.parent().unwrap()).await?;
    tokio::fs::create_dir_all(stale.parent().unwrap()).await?;
    tokio::fs::write(&keep, b"keep").await?;
    tokio::fs::write(&stale, b"stale").await?;

    let config = config_for(&dirs).clean_output(false).build()?;
    let chapters = chapters_of(&config).await?;
    Production::new(config)
        .with_packager(Arc::new(RecordingPackager::default()))
        .run(&chapters)
        .await?;

    assert!(keep.exists());
    assert!(!stale.exists());
    Ok(())
}

#[tokio::test]
async fn test_cbz_packager_writes_pages_and_comic_info() -> Result<()> {
    let dirs = setup_test_dirs("cbz_packager").await;
    create_chapter(&dirs.source_dir.join("Chapter 1"), 2).await?;

    let config = config_for(&dirs)
        .author("Jane Doe")
        .packaging(PackagingProfile::Cbz)
        .build()?;
    let chapters = chapters_of(&config).await?;
    let summary = Production::new(config.clone()).run(&chapters).await?;

    let artifact = config.ebooks_dir().join("Test Series - v01.cbz");
    let expected = VolumeStatus::Packaged(artifact.clone());
    assert_eq!(summary.outcomes[0].status, expected);

    let entries = zip_entry_names(&artifact);
    assert!(entries.contains(&"00001.jpg".to_string()));
    assert!(entries.contains(&"00002.jpg".to_string()));
    let comic_info = read_zip_entry(&artifact, "ComicInfo.xml");
    assert!(comic_info.contains("<Title>Test Series - v01</Title>"));
    assert!(comic_info.contains("<Writer>Jane Doe</Writer>"));
    assert!(comic_info.contains("<PageCount>2</PageCount>"));
    Ok(())
}

#[tokio::test]
async fn test_existing_artifact_is_never_overwritten() -> Result<()> {
    let dirs = setup_test_dirs("artifact_collision").await;
    create_chapter(&dirs.source_dir.join("Chapter 1"), 1).await?;
    let existing = dirs.work_dir.join("ebooks").join("Test Series - v01.cbz");
    tokio::fs::create_dir_all(existing.parent().unwrap()).await?;
    tokio::fs::write(&existing, b"previous").await?;

    let config = config_for(&dirs)
        .clean_output(false)
        .packaging(PackagingProfile::Cbz)
        .build()?;
    let chapters = chapters_of(&config).await?;
    let summary = Production::new(config).run(&chapters).await?;

    assert_eq!(tokio::fs::read(&existing).await?, b"previous");
    match &summary.outcomes[0].status {
        VolumeStatus::Packaged(path) => {
            assert_ne!(path, &existing);
            let name = seisho::path_utils::get_file_name_lossy(path);
            assert!(name.starts_with("Test Series - v01_"));
            assert!(name.ends_with(".cbz"));
        }
        other => panic!("unexpected status {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_epub_packager_builds_archive() -> Result<()> {
    let dirs = setup_test_dirs("epub_packager").await;
    create_chapter(&dirs.source_dir.join("Chapter 1"), 3).await?;

    let config = config_for(&dirs).packaging(PackagingProfile::Epub).build()?;
    let chapters = chapters_of(&config).await?;
    let summary = Production::new(config.clone()).run(&chapters).await?;

    let artifact = config.ebooks_dir().join("Test Series - v01.epub");
    assert_eq!(summary.volumes_produced, 1);
    assert!(artifact.is_file());
    let entries = zip_entry_names(&artifact);
    assert!(entries.iter().any(|e| e == "mimetype"));
    assert_eq!(entries.iter().filter(|e| e.ends_with(".jpg")).count(), 3);

    let opf_name = entries
        .iter()
        .find(|e| e.ends_with("content.opf"))
        .expect("package document missing");
    let opf = read_zip_entry(&artifact, opf_name);
    assert!(opf.contains("property=\"rendition:layout\">pre-paginated</meta>"));
    assert!(opf.contains("property=\"rendition:spread\">none</meta>"));
    assert!(opf.contains("page-progression-direction=\"rtl\""));
    Ok(())
}

#[tokio::test]
async fn test_session_allows_one_active_run() -> Result<()> {
    let dirs = setup_test_dirs("single_flight").await;
    create_chapter(&dirs.source_dir.join("Chapter 1"), 1).await?;
    let config = config_for(&dirs).build()?;
    let chapters = chapters_of(&config).await?;

    let session = ProductionSession::new();
    let production =
        || Production::new(config.clone()).with_packager(Arc::new(RecordingPackager::default()));

    let handle = session
        .start(production(), chapters.clone())
        .expect("first run must start");
    assert!(session.is_active());
    assert!(session.start(production(), chapters.clone()).is_none());

    let summary = timeout(LONG_TEST_TIMEOUT, handle.wait())
        .await
        .expect("Test timed out")?;
    assert_eq!(summary.volumes_produced, 1);
    assert!(!session.is_active());

    let again = session
        .start(production(), chapters)
        .expect("session must be free again");
    again.wait().await?;
    Ok(())
}

#[tokio::test]
async fn test_cancel_before_first_volume() -> Result<()> {
    let dirs = setup_test_dirs("cancel_early").await;
    create_chapter(&dirs.source_dir.join("Chapter 1"), 2).await?;
    let config = config_for(&dirs).build()?;
    let chapters = chapters_of(&config).await?;

    let packager = Arc::new(RecordingPackager::default());
    let session = ProductionSession::new();
    let production = Production::new(config).with_packager(packager.clone());
    let handle = session.start(production, chapters).expect("run must start");
    handle.cancel();

    let summary = handle.wait().await?;
    assert!(summary.cancelled);
    assert_eq!(summary.volumes_produced, 0);
    assert!(summary.outcomes.is_empty());
    assert!(packager.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cancel_between_volumes() -> Result<()> {
    let dirs = setup_test_dirs("cancel_between").await;
    for i in 1..=3 {
        create_chapter(&dirs.source_dir.join(format!("Chapter {}", i)), 1).await?;
    }
    let config = config_for(&dirs).group_size(1u32).build()?;
    let chapters = chapters_of(&config).await?;

    let token = CancellationToken::new();
    let packager = Arc::new(RecordingPackager {
        cancel_after_first: Some(token.clone()),
        ..Default::default()
    });
    let summary = Production::new(config.clone())
        .with_packager(packager.clone())
        .with_cancellation(token)
        .run(&chapters)
        .await?;

    assert!(summary.cancelled);
    assert_eq!(summary.volumes_produced, 1);
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(packager.requests().len(), 1);
    assert!(!config.volume_dir(2).exists());
    Ok(())
}

/// Denoiser double that requests cancellation while the first page is processed.
#[derive(Debug)]
struct CancellingDenoiser {
    token: CancellationToken,
}

impl Denoiser for CancellingDenoiser {
    fn name(&self) -> &'static str {
        "cancelling"
    }

    fn denoise(&self, image: &image::RgbImage, _strength: f32) -> Result<image::RgbImage> {
        self.token.cancel();
        Ok(image.clone())
    }
}

#[tokio::test]
async fn test_cancel_between_pages_keeps_partial_volume_unpackaged() -> Result<()> {
    let dirs = setup_test_dirs("cancel_between_pages").await;
    create_chapter(&dirs.source_dir.join("Chapter 1"), 3).await?;
    let config = config_for(&dirs)
        .enhancement(
            EnhancementConfig::builder()
                .preset(Preset::JpegArtifacts)
                .build()?,
        )
        .build()?;
    let chapters = chapters_of(&config).await?;

    let token = CancellationToken::new();
    let denoiser = CancellingDenoiser {
        token: token.clone(),
    };
    let packager = Arc::new(RecordingPackager::default());
    let summary = Production::new(config.clone())
        .with_capabilities(Capabilities::new(Arc::new(denoiser), Arc::new(Sauvola)))
        .with_packager(packager.clone())
        .with_cancellation(token)
        .run(&chapters)
        .await?;

    assert!(summary.cancelled);
    assert_eq!(summary.volumes_produced, 0);
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(summary.outcomes[0].status, VolumeStatus::Cancelled);
    assert_eq!(summary.outcomes[0].pages_written, 1);
    assert!(packager.requests().is_empty());
    assert_eq!(file_names(&config.volume_dir(1)).await, vec!["00001.jpg"]);
    Ok(())
}

/// Writes an executable shell script standing in for the comic converter.
#[cfg(unix)]
fn converter_script(dirs: &TestDirs, name: &str, body: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dirs.root.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(std::fs::canonicalize(path)?)
}

#[cfg(unix)]
fn kcc_profile(program: PathBuf) -> PackagingProfile {
    PackagingProfile::Kcc {
        program,
        device: "KPW".into(),
        format: OutputFormat::Mobi,
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_kcc_artifact_is_renamed_after_the_volume() -> Result<()> {
    let dirs = setup_test_dirs("kcc_rename").await;
    create_chapter(&dirs.source_dir.join("Chapter 1"), 2).await?;
    let script = converter_script(
        &dirs,
        "kcc-ok.sh",
        r#"while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then out="$2"; fi
  shift
done
echo converted > "$out/converted.mobi"
"#,
    )?;

    let config = config_for(&dirs).packaging(kcc_profile(script)).build()?;
    let chapters = chapters_of(&config).await?;
    let summary = Production::new(config.clone()).run(&chapters).await?;

    let artifact = config.ebooks_dir().join("Test Series - v01.mobi");
    let expected = VolumeStatus::Packaged(artifact.clone());
    assert_eq!(summary.outcomes[0].status, expected);
    assert_eq!(summary.volumes_produced, 1);
    assert!(artifact.is_file());
    assert!(!config.ebooks_dir().join("converted.mobi").exists());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_kcc_without_artifact_fails_the_volume() -> Result<()> {
    let dirs = setup_test_dirs("kcc_no_artifact").await;
    create_chapter(&dirs.source_dir.join("Chapter 1"), 1).await?;
    let script = converter_script(&dirs, "kcc-noop.sh", "exit 0\n")?;

    let config = config_for(&dirs).packaging(kcc_profile(script)).build()?;
    let chapters = chapters_of(&config).await?;
    let summary = Production::new(config).run(&chapters).await?;

    assert_eq!(summary.volumes_produced, 0);
    match &summary.outcomes[0].status {
        VolumeStatus::Failed(reason) => assert!(reason.contains("No .mobi artifact produced")),
        other => panic!("unexpected status {:?}", other),
    }
    Ok(())
}
