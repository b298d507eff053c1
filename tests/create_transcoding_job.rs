mod common;

use common::{heights, request, Backend, Cluster, Federation};
use encore::application::queue::JobStatus;
use encore::domain::jobs::TranscodeRequest;
use encore::domain::video::VideoId;
use serde_json::{json, Value};

fn resolution(video: &VideoId, height: u32) -> TranscodeRequest {
    TranscodeRequest {
        resolution: Some(height),
        ..request(video)
    }
}

fn file_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap()
}

fn hls(video: &VideoId, height: Option<u32>) -> TranscodeRequest {
    TranscodeRequest {
        resolution: height,
        generate_hls: true,
        generate_all_resolutions: height.is_none(),
        ..request(video)
    }
}

async fn uploads_are_mirrored_untouched(backend: Backend, federation: Federation) {
    let cluster = Cluster::with_uploads(backend, federation).await;

    for video in &cluster.videos {
        let renditions = cluster.mirrored(video);
        assert_eq!(heights(&renditions.files), vec![720]);
        assert!(renditions.streaming_playlists.is_empty());
        cluster.assert_fetchable(&renditions.files[0].url).await;
    }
    assert_eq!(cluster.transcoder.encodes(), 0);
}

async fn optimize_original_builds_the_progressive_ladder(backend: Backend, federation: Federation) {
    let cluster = Cluster::with_uploads(backend, federation).await;
    let video = cluster.video(2);
    let uploaded = cluster.mirrored(video).files[0].clone();

    cluster.run(request(video)).await;

    let renditions = cluster.mirrored(video);
    assert_eq!(heights(&renditions.files), vec![720, 480, 360, 240]);
    assert!(renditions.streaming_playlists.is_empty());
    assert_ne!(renditions.files[0].fingerprint, uploaded.fingerprint);
    for file in &renditions.files {
        cluster.assert_fetchable(&file.url).await;
    }

    // The placeholder upload is gone once the optimized file replaced it.
    let response = cluster.http.get(&uploaded.url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(cluster.transcoder.encodes(), 4);

    // Other videos are untouched.
    assert_eq!(heights(&cluster.mirrored(cluster.video(1)).files), vec![720]);
}

async fn single_resolution_is_added_below_the_source(backend: Backend, federation: Federation) {
    let cluster = Cluster::with_uploads(backend, federation).await;
    let video = cluster.video(1);
    let before = cluster.mirrored(video).files[0].clone();

    cluster.run(resolution(video, 480)).await;

    let renditions = cluster.mirrored(video);
    assert_eq!(heights(&renditions.files), vec![720, 480]);
    assert_eq!(renditions.files[0], before);
    assert!(renditions.streaming_playlists.is_empty());
    assert_eq!(cluster.transcoder.encodes(), 1);
}

async fn single_hls_member_is_idempotent(backend: Backend, federation: Federation) {
    let cluster = Cluster::with_uploads(backend, federation).await;
    let video = cluster.video(3);
    let before = cluster.mirrored(video).files.clone();

    cluster.run(hls(video, Some(480))).await;
    let first = cluster.mirrored(video);
    assert_eq!(first.files, before);
    assert_eq!(first.streaming_playlists.len(), 1);
    assert_eq!(heights(&first.streaming_playlists[0].files), vec![480]);
    assert_eq!(cluster.transcoder.encodes(), 1);

    cluster.run(hls(video, Some(480))).await;
    assert_eq!(cluster.mirrored(video), first);
    assert_eq!(cluster.transcoder.encodes(), 1);
}

async fn hls_for_all_resolutions_follows_the_ladder(backend: Backend, federation: Federation) {
    let cluster = Cluster::with_uploads(backend, federation).await;
    let video = cluster.video(4);
    let before = cluster.mirrored(video).files.clone();

    cluster.run(hls(video, None)).await;

    let renditions = cluster.mirrored(video);
    assert_eq!(renditions.files, before);
    assert_eq!(renditions.streaming_playlists.len(), 1);
    let playlist = &renditions.streaming_playlists[0];
    assert_eq!(heights(&playlist.files), vec![720, 480, 360, 240]);
    assert_eq!(cluster.transcoder.encodes(), 4);

    // Nothing left to generate.
    let handles = cluster.origin.submit(&hls(video, None)).unwrap();
    assert!(handles.is_empty());
    assert_eq!(cluster.transcoder.encodes(), 4);
}

async fn default_job_with_transcoding_enabled(backend: Backend, federation: Federation) {
    let cluster = Cluster::with_uploads(backend, federation).await;
    let video = cluster.video(5);

    let mut settings = common::ladder_settings();
    settings.enabled = true;
    let response = cluster
        .http
        .put(format!("{}/api/v1/config/transcoding", cluster.origin_url))
        .json(&settings)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let response = cluster
        .http
        .post(format!(
            "{}/api/v1/videos/{}/transcoding",
            cluster.origin_url, video
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["jobs"][0]["kind"], json!("optimize-original"));
    cluster.settle().await;

    let renditions = cluster.mirrored(video);
    assert_eq!(heights(&renditions.files), vec![720, 480, 360, 240]);
    assert_eq!(renditions.streaming_playlists.len(), 1);
    let playlist = &renditions.streaming_playlists[0];
    assert_eq!(heights(&playlist.files), vec![720, 480, 360, 240]);

    for file in renditions.files.iter().chain(&playlist.files) {
        cluster.assert_fetchable(&file.url).await;
    }
    let master = cluster.assert_fetchable(&playlist.manifest_url).await;
    let master = String::from_utf8(master).unwrap();
    for member in &playlist.files {
        let variant_url = member.playlist_url.as_deref().expect("member playlist");
        let variant = String::from_utf8(cluster.assert_fetchable(variant_url).await).unwrap();
        assert!(
            variant.contains(file_name(&member.url)),
            "variant {} does not reference {}",
            variant_url,
            member.url
        );
        assert!(
            master.contains(file_name(variant_url)),
            "master playlist lacks {}",
            variant_url
        );
    }
    assert_eq!(cluster.transcoder.encodes(), 8);
}

async fn requests_above_the_source_reuse_its_rendition(backend: Backend, federation: Federation) {
    let cluster = Cluster::with_uploads(backend, federation).await;
    let video = cluster.video(2);
    let uploaded = cluster.mirrored(video).files.clone();

    cluster.run(hls(video, Some(1080))).await;
    let first = cluster.mirrored(video);
    assert_eq!(heights(&first.streaming_playlists[0].files), vec![720]);
    assert_eq!(cluster.transcoder.encodes(), 1);

    for request in [
        hls(video, Some(720)),
        hls(video, Some(1080)),
        resolution(video, 720),
        resolution(video, 1080),
    ] {
        cluster.run(request).await;
    }
    let renditions = cluster.mirrored(video);
    assert_eq!(renditions, first);
    assert_eq!(renditions.files, uploaded);
    assert_eq!(cluster.transcoder.encodes(), 1);
}

async fn concurrent_duplicates_collapse(backend: Backend, federation: Federation) {
    let cluster = Cluster::with_uploads(backend, federation).await;
    let video = cluster.video(3);

    let first = cluster.origin.submit(&hls(video, Some(360))).unwrap();
    let second = cluster.origin.submit(&hls(video, Some(360))).unwrap();
    match (first[0].wait().await, second[0].wait().await) {
        (JobStatus::Done(a), JobStatus::Done(b)) => assert_eq!(a, b),
        other => panic!("duplicates did not both succeed: {:?}", other),
    }
    cluster.settle().await;

    let renditions = cluster.mirrored(video);
    assert_eq!(heights(&renditions.streaming_playlists[0].files), vec![360]);
    assert_eq!(cluster.transcoder.encodes(), 1);
}

macro_rules! scenarios {
    ($($name:ident => $backend:expr, $federation:expr;)*) => {
        $(
            mod $name {
                use super::*;

                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn uploads_without_transcoding() {
                    uploads_are_mirrored_untouched($backend, $federation).await;
                }

                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn optimize_original() {
                    optimize_original_builds_the_progressive_ladder($backend, $federation).await;
                }

                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn generate_resolution() {
                    single_resolution_is_added_below_the_source($backend, $federation).await;
                }

                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn generate_single_hls() {
                    single_hls_member_is_idempotent($backend, $federation).await;
                }

                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn generate_hls_for_all_resolutions() {
                    hls_for_all_resolutions_follows_the_ladder($backend, $federation).await;
                }

                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn default_job_after_enabling_transcoding() {
                    default_job_with_transcoding_enabled($backend, $federation).await;
                }

                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn requests_above_the_source() {
                    requests_above_the_source_reuse_its_rendition($backend, $federation).await;
                }

                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn duplicate_requests() {
                    concurrent_duplicates_collapse($backend, $federation).await;
                }
            }
        )*
    };
}

scenarios! {
    local_storage => Backend::Local, Federation::Http;
    object_storage => Backend::ObjectStorage, Federation::InProcess;
}
