//! Assemblage des flux segmentés : ordre, échecs, décodeur externe et
//! nettoyage des répertoires temporaires

use base64::Engine;
use chrono::{Duration, Utc};
use futures::StreamExt;
use mockito::{Matcher, Mock, Server, ServerGuard};
use pmotidal::stream::TranscodeOutput;
use pmotidal::{
    AudioQuality, Credential, OutputMode, QualityRequest, SegmentPlan, StreamAssembler, TidalApi,
    TidalClient, TidalError, TranscodeSpec,
};
use serde_json::json;
use std::path::Path;

async fn mock_segment(server: &mut ServerGuard, index: usize, status: usize) -> Mock {
    server
        .mock("GET", format!("/seg/{}.mp4", index).as_str())
        .with_status(status)
        .with_body(format!("<seg{}>", index))
        .create_async()
        .await
}

fn plan(server: &ServerGuard, count: usize) -> SegmentPlan {
    SegmentPlan::from_urls(
        (0..count).map(|i| format!("{}/seg/{}.mp4", server.url(), i)),
        "audio/mp4",
    )
}

fn assembler(scratch_root: &Path) -> StreamAssembler {
    StreamAssembler::new(reqwest::Client::new())
        .with_prefetch(3)
        .with_scratch_root(scratch_root)
        .with_process_wait(std::time::Duration::from_secs(10))
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

/// Écrit son entrée standard dans le fichier `{output}`
#[cfg(unix)]
fn file_writer() -> TranscodeSpec {
    TranscodeSpec::new(
        "sh",
        vec![
            "-c".to_string(),
            r#"cat > "$1""#.to_string(),
            "sh".to_string(),
            pmotidal::stream::OUTPUT_PLACEHOLDER.to_string(),
        ],
        TranscodeOutput::File {
            file_name: "data.m4a".to_string(),
        },
        "audio/mp4",
    )
}

#[tokio::test]
async fn test_passthrough_preserves_segment_order() {
    let mut server = Server::new_async().await;
    let mut mocks = Vec::new();
    for i in 0..5 {
        mocks.push(mock_segment(&mut server, i, 200).await);
    }
    let scratch = tempfile::tempdir().unwrap();

    let handle = assembler(scratch.path())
        .assemble(plan(&server, 5), OutputMode::Passthrough)
        .await
        .unwrap();

    assert_eq!(handle.mime_type, "audio/mp4");
    assert_eq!(handle.size_bytes, None);
    assert_eq!(
        handle.into_bytes().await.unwrap(),
        b"<seg0><seg1><seg2><seg3><seg4>"
    );
}

#[tokio::test]
async fn test_passthrough_stops_at_failed_segment() {
    let mut server = Server::new_async().await;
    let _ok0 = mock_segment(&mut server, 0, 200).await;
    let _failed = mock_segment(&mut server, 1, 500).await;
    let _ok2 = mock_segment(&mut server, 2, 200).await;
    let scratch = tempfile::tempdir().unwrap();

    let mut handle = assembler(scratch.path())
        .assemble(plan(&server, 3), OutputMode::Passthrough)
        .await
        .unwrap();

    let first = handle.stream.next().await.unwrap().unwrap();
    assert_eq!(&first[..], b"<seg0>");
    assert!(matches!(
        handle.stream.next().await,
        Some(Err(TidalError::SegmentFetchFailed { index: 1, .. }))
    ));
    assert!(handle.stream.next().await.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_segment_failure_removes_scratch_directory() {
    let mut server = Server::new_async().await;
    let _ok0 = mock_segment(&mut server, 0, 200).await;
    let _failed = mock_segment(&mut server, 1, 500).await;
    let _ok2 = mock_segment(&mut server, 2, 200).await;
    let scratch = tempfile::tempdir().unwrap();

    let result = assembler(scratch.path())
        .assemble(plan(&server, 3), OutputMode::Transcode(file_writer()))
        .await;

    match result {
        Err(TidalError::SegmentFetchFailed { index, .. }) => assert_eq!(index, 1),
        other => panic!("expected SegmentFetchFailed(1), got {:?}", other),
    }
    assert!(is_empty_dir(scratch.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_file_output_is_streamed_then_removed() {
    let mut server = Server::new_async().await;
    let mut mocks = Vec::new();
    for i in 0..3 {
        mocks.push(mock_segment(&mut server, i, 200).await);
    }
    let scratch = tempfile::tempdir().unwrap();

    let handle = assembler(scratch.path())
        .assemble(plan(&server, 3), OutputMode::Transcode(file_writer()))
        .await
        .unwrap();

    assert_eq!(handle.mime_type, "audio/mp4");
    // Le fichier existe tant que le flux n'est pas consommé
    assert!(!is_empty_dir(scratch.path()));

    assert_eq!(handle.into_bytes().await.unwrap(), b"<seg0><seg1><seg2>");
    assert!(is_empty_dir(scratch.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_dropped_file_stream_removes_scratch_directory() {
    let mut server = Server::new_async().await;
    let _ok0 = mock_segment(&mut server, 0, 200).await;
    let scratch = tempfile::tempdir().unwrap();

    let handle = assembler(scratch.path())
        .assemble(plan(&server, 1), OutputMode::Transcode(file_writer()))
        .await
        .unwrap();
    assert!(!is_empty_dir(scratch.path()));

    drop(handle);
    assert!(is_empty_dir(scratch.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_stdout_decoder_output_in_order() {
    let mut server = Server::new_async().await;
    let mut mocks = Vec::new();
    for i in 0..4 {
        mocks.push(mock_segment(&mut server, i, 200).await);
    }
    let scratch = tempfile::tempdir().unwrap();
    let spec = TranscodeSpec::new("cat", Vec::new(), TranscodeOutput::Stdout, "audio/flac");

    let handle = assembler(scratch.path())
        .assemble(plan(&server, 4), OutputMode::Transcode(spec))
        .await
        .unwrap();

    assert_eq!(handle.mime_type, "audio/flac");
    assert_eq!(
        handle.into_bytes().await.unwrap(),
        b"<seg0><seg1><seg2><seg3>"
    );
    assert!(is_empty_dir(scratch.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_decoder_failure_carries_diagnostics() {
    let mut server = Server::new_async().await;
    let _ok0 = mock_segment(&mut server, 0, 200).await;
    let scratch = tempfile::tempdir().unwrap();
    let spec = TranscodeSpec::new(
        "sh",
        vec![
            "-c".to_string(),
            "cat > /dev/null; echo 'invalid data found' >&2; exit 3".to_string(),
        ],
        TranscodeOutput::Stdout,
        "audio/flac",
    );

    let handle = assembler(scratch.path())
        .assemble(plan(&server, 1), OutputMode::Transcode(spec))
        .await
        .unwrap();

    match handle.into_bytes().await {
        Err(TidalError::TranscodeFailed(diagnostics)) => {
            assert!(diagnostics.contains("invalid data found"), "{}", diagnostics)
        }
        other => panic!("expected TranscodeFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_decoder_is_reported() {
    let mut server = Server::new_async().await;
    let _ok0 = mock_segment(&mut server, 0, 200).await;
    let scratch = tempfile::tempdir().unwrap();
    let spec = TranscodeSpec::flac_stdout("pmotidal-no-such-decoder");

    let result = assembler(scratch.path())
        .assemble(plan(&server, 1), OutputMode::Transcode(spec))
        .await;

    assert!(matches!(result, Err(TidalError::TranscodeFailed(_))));
}

#[tokio::test]
async fn test_dash_track_through_stream_factory() {
    let mut server = Server::new_async().await;
    let mpd = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT8S">
  <BaseURL>{}/dash/</BaseURL>
  <Period id="0">
    <AdaptationSet id="0" contentType="audio" mimeType="audio/mp4">
      <Representation id="FLAC,96000,24" codecs="flac" bandwidth="3000000">
        <SegmentTemplate timescale="96000" initialization="init.mp4" media="$Number$.mp4" startNumber="1">
          <SegmentTimeline>
            <S d="384000" r="1"/>
          </SegmentTimeline>
        </SegmentTemplate>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#,
        server.url()
    );

    let _track = server
        .mock("GET", "/v1/tracks/77")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "id": 77,
                "title": "Hi-Res",
                "audioQuality": "LOSSLESS",
                "mediaMetadata": {"tags": ["LOSSLESS", "HIRES_LOSSLESS"]}
            })
            .to_string(),
        )
        .create_async()
        .await;
    let _contributors = server
        .mock("GET", "/v1/tracks/77/contributors")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"items": []}"#)
        .create_async()
        .await;
    let _playback = server
        .mock("GET", "/v1/tracks/77/playbackinfopostpaywall/v4")
        .match_query(Matcher::UrlEncoded(
            "audioquality".into(),
            "HI_RES_LOSSLESS".into(),
        ))
        .with_status(200)
        .with_body(
            json!({
                "trackId": 77,
                "audioQuality": "HI_RES_LOSSLESS",
                "manifestMimeType": "application/dash+xml",
                "manifest": base64::engine::general_purpose::STANDARD.encode(mpd)
            })
            .to_string(),
        )
        .create_async()
        .await;
    let mut media = Vec::new();
    for (path, body) in [("init", "<init>"), ("1", "<m1>"), ("2", "<m2>")] {
        media.push(
            server
                .mock("GET", format!("/dash/{}.mp4", path).as_str())
                .with_status(200)
                .with_body(body)
                .create_async()
                .await,
        );
    }

    let api = TidalApi::with_base_urls(
        "client",
        "secret",
        Credential::new("token", "refresh", Utc::now() + Duration::hours(1))
            .with_country_code("US"),
        format!("{}/v1/", server.url()),
        format!("{}/auth/", server.url()),
    )
    .unwrap();
    let client = TidalClient::new(api).with_remux_segments(false);

    let resolution = client.resolve("https://tidal.com/browse/track/77").await.unwrap();
    let handle = resolution
        .stream_factory()
        .unwrap()
        .open(&QualityRequest::exactly(AudioQuality::HiResLossless))
        .await
        .unwrap();

    assert_eq!(handle.mime_type, "audio/mp4");
    assert_eq!(handle.size_bytes, None);
    assert_eq!(handle.into_bytes().await.unwrap(), b"<init><m1><m2>");
}

/// Vrai tant que le processus existe et n'est pas un zombie
#[cfg(target_os = "linux")]
fn process_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .map(|state| state != 'Z' && state != 'X')
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
async fn wait_for_exit(pid: u32) -> bool {
    for _ in 0..40 {
        if !process_running(pid) {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    false
}

#[cfg(target_os = "linux")]
async fn read_pid(path: &Path) -> u32 {
    for _ in 0..40 {
        if let Ok(text) = std::fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("no pid written to {}", path.display());
}

/// Serveur qui accepte les connexions sans jamais répondre
#[cfg(target_os = "linux")]
async fn stalled_segment_url() -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    (format!("http://{}/seg/stalled.mp4", addr), task)
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_dropped_stdout_stream_kills_decoder() {
    let mut server = Server::new_async().await;
    let mut mocks = Vec::new();
    for i in 0..2 {
        mocks.push(mock_segment(&mut server, i, 200).await);
    }
    let scratch = tempfile::tempdir().unwrap();
    let pid_dir = tempfile::tempdir().unwrap();
    let pid_file = pid_dir.path().join("decoder.pid");

    // Le décodeur reste vivant après avoir recopié son entrée
    let spec = TranscodeSpec::new(
        "sh",
        vec![
            "-c".to_string(),
            r#"echo $$ > "$1"; cat; exec sleep 100"#.to_string(),
            "sh".to_string(),
            pid_file.to_string_lossy().into_owned(),
        ],
        TranscodeOutput::Stdout,
        "audio/flac",
    );

    let mut handle = assembler(scratch.path())
        .assemble(plan(&server, 2), OutputMode::Transcode(spec))
        .await
        .unwrap();

    let first = handle.stream.next().await.unwrap().unwrap();
    assert!(!first.is_empty());

    let pid = read_pid(&pid_file).await;
    assert!(process_running(pid));

    drop(handle);
    assert!(wait_for_exit(pid).await, "decoder {} still running", pid);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_cancelled_assembly_kills_decoder_and_removes_scratch() {
    let mut server = Server::new_async().await;
    let _ok0 = mock_segment(&mut server, 0, 200).await;
    let (stalled, _listener) = stalled_segment_url().await;
    let scratch = tempfile::tempdir().unwrap();
    let pid_dir = tempfile::tempdir().unwrap();
    let pid_file = pid_dir.path().join("decoder.pid");

    let spec = TranscodeSpec::new(
        "sh",
        vec![
            "-c".to_string(),
            r#"echo $$ > "$2"; exec cat > "$1""#.to_string(),
            "sh".to_string(),
            pmotidal::stream::OUTPUT_PLACEHOLDER.to_string(),
            pid_file.to_string_lossy().into_owned(),
        ],
        TranscodeOutput::File {
            file_name: "data.m4a".to_string(),
        },
        "audio/mp4",
    );
    let plan = SegmentPlan::from_urls(
        vec![format!("{}/seg/0.mp4", server.url()), stalled],
        "audio/mp4",
    );

    // Le second segment ne répond jamais : l'assemblage reste bloqué
    // sur l'alimentation du décodeur jusqu'à son abandon
    let assembler = assembler(scratch.path());
    let assembly = assembler.assemble(plan, OutputMode::Transcode(spec));
    let outcome = tokio::time::timeout(std::time::Duration::from_millis(500), assembly).await;
    assert!(outcome.is_err(), "assembly should still be pending");

    let pid = read_pid(&pid_file).await;
    assert!(wait_for_exit(pid).await, "decoder {} still running", pid);
    assert!(is_empty_dir(scratch.path()));
}
