mod common;

use {
    common::{assert_non_decreasing, init_tracing, recorder, settle, until, MockService},
    goods_request::{AssetKey, DownloadOptions, Error, LoaderBuilder, Retry, SignalState},
    parking_lot::Mutex,
    std::sync::Arc,
};

#[tokio::test]
async fn nothing_to_download_reports_done_once() {
    init_tracing();
    let service = MockService::new();
    let loader = LoaderBuilder::new().build(service.clone());

    let (progress, log) = recorder();
    let download = loader.downloads().download_dependencies(
        &AssetKey::from("pkg_a"),
        DownloadOptions {
            progress: Some(progress),
            ..DownloadOptions::default()
        },
    );

    let outcome = download.wait().await;
    assert!(outcome.is_succeeded());
    assert_eq!(*log.lock(), vec![1.0]);
    assert!(service.download_ops("pkg_a").is_empty());

    let sizes = service.size_ops("pkg_a");
    assert_eq!(sizes.len(), 1);
    assert_eq!(sizes[0].releases(), 1);
}

#[tokio::test]
async fn download_progress_ends_with_total_size() {
    init_tracing();
    let service = MockService::new();
    service.script("pkg_b", |script| {
        script.size = 1000;
        script.download_steps = vec![0.75, 0.8, 0.85, 0.9, 0.95, 1.0];
    });
    let loader = LoaderBuilder::new().build(service.clone());

    let bytes = Arc::new(Mutex::new(Vec::new()));
    let toggles = Arc::new(Mutex::new(Vec::new()));
    let options = DownloadOptions::new()
        .with_byte_progress({
            let bytes = bytes.clone();
            move |ratio, size| bytes.lock().push((ratio, size))
        })
        .with_sub_progress(
            {
                let toggles = toggles.clone();
                move |on| toggles.lock().push(on)
            },
            |_| {},
        );

    let outcome = loader
        .downloads()
        .download_dependencies(&AssetKey::from("pkg_b"), options)
        .wait()
        .await;
    assert!(outcome.is_succeeded());

    let bytes = bytes.lock();
    let ratios: Vec<f32> = bytes.iter().map(|&(ratio, _)| ratio).collect();
    assert_non_decreasing(&ratios);
    assert_eq!(ratios[0], 0.0);
    assert!(bytes.iter().all(|&(_, size)| size == 1000));
    assert_eq!(bytes.last(), Some(&(1.0, 1000)));
    assert_eq!(*toggles.lock(), vec![true, false]);

    let downloads = service.download_ops("pkg_b");
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].releases(), 1);
    assert_eq!(service.size_ops("pkg_b")[0].releases(), 1);
}

#[tokio::test]
async fn configured_floor_is_used_for_rescaling() {
    init_tracing();
    let service = MockService::new();
    service.script("pkg_f", |script| {
        script.size = 10;
        script.download_steps = vec![0.5, 0.75];
    });
    let loader = LoaderBuilder::new()
        .with_progress_floor(0.5)
        .build(service.clone());

    let (progress, log) = recorder();
    let outcome = loader
        .downloads()
        .download_dependencies(
            &AssetKey::from("pkg_f"),
            DownloadOptions {
                progress: Some(progress),
                ..DownloadOptions::default()
            },
        )
        .wait()
        .await;

    assert!(outcome.is_succeeded());
    assert_eq!(*log.lock(), vec![0.0, 0.5, 1.0]);
}

#[tokio::test]
async fn concurrent_downloads_share_one_operation() {
    init_tracing();
    let service = MockService::new();
    service.script("pkg_d", |script| script.size = 42);
    let loader = LoaderBuilder::new().build(service.clone());

    let key = AssetKey::from("pkg_d");
    let first = loader
        .downloads()
        .download_dependencies(&key, DownloadOptions::new());
    let second = loader
        .downloads()
        .download_dependencies(&key, DownloadOptions::new());
    assert!(first.signal().ptr_eq(second.signal()));
    assert!(loader.downloads().is_downloading("pkg_d"));

    let (a, b) = futures_util::future::join(first.wait(), second.wait()).await;
    assert!(a.is_succeeded());
    assert!(b.is_succeeded());
    assert_eq!(service.size_ops("pkg_d").len(), 1);
    assert_eq!(service.download_ops("pkg_d").len(), 1);
    assert!(!loader.downloads().is_downloading("pkg_d"));

    // Settled downloads are not reused.
    let third = loader
        .downloads()
        .download_dependencies(&key, DownloadOptions::new());
    assert!(!third.signal().ptr_eq(first.signal()));
    assert!(third.wait().await.is_succeeded());
    assert_eq!(service.download_ops("pkg_d").len(), 2);
}

#[tokio::test]
async fn empty_key_is_canceled_without_external_calls() {
    init_tracing();
    let service = MockService::new();
    let loader = LoaderBuilder::new().build(service.clone());

    let download = loader
        .downloads()
        .download_dependencies(&AssetKey::default(), DownloadOptions::new());
    assert_eq!(download.signal().state(), SignalState::Canceled);
    assert!(service.size_ops("").is_empty());
}

#[tokio::test]
async fn failed_size_query_without_hook_cancels() {
    init_tracing();
    let service = MockService::new();
    service.script("pkg_s", |script| script.size_fails = true);
    let loader = LoaderBuilder::new().build(service.clone());

    let outcome = loader
        .downloads()
        .download_dependencies(&AssetKey::from("pkg_s"), DownloadOptions::new())
        .wait()
        .await;

    assert!(outcome.is_canceled());
    assert_eq!(service.size_ops("pkg_s")[0].releases(), 1);
    assert!(service.download_ops("pkg_s").is_empty());
}

#[tokio::test]
async fn failed_download_is_retried_through_hook() {
    init_tracing();
    let service = MockService::new();
    service.script("pkg_r", |script| {
        script.size = 100;
        script.download_fails = true;
    });
    let loader = LoaderBuilder::new().build(service.clone());

    let retries = Arc::new(Mutex::new(Vec::<Retry>::new()));
    let options = DownloadOptions::new().with_on_fail({
        let retries = retries.clone();
        move |retry| retries.lock().push(retry)
    });

    let download = loader
        .downloads()
        .download_dependencies(&AssetKey::from("pkg_r"), options);

    until("failure hook", || !retries.lock().is_empty()).await;
    settle().await;
    assert_eq!(download.signal().state(), SignalState::Pending);

    let retry = retries.lock()[0].clone();
    match retry.error() {
        Error::DownloadFailed { key, .. } => assert_eq!(key.as_str(), "pkg_r"),
        other => panic!("Unexpected error {:?}", other),
    }

    service.script("pkg_r", |script| script.download_fails = false);
    retry.retry();

    assert!(download.wait().await.is_succeeded());
    let downloads = service.download_ops("pkg_r");
    assert_eq!(downloads.len(), 2);
    assert!(downloads.iter().all(|op| op.releases() == 1));
    assert_eq!(retries.lock().len(), 1);

    // Retry of a settled download does nothing.
    retry.retry();
    settle().await;
    assert_eq!(service.download_ops("pkg_r").len(), 2);
}

#[tokio::test]
async fn canceled_download_releases_handle() {
    init_tracing();
    let service = MockService::new();
    service.script("pkg_c", |script| {
        script.size = 5000;
        script.download_steps = vec![0.8; 200];
    });
    let loader = LoaderBuilder::new().build(service.clone());

    let download = loader
        .downloads()
        .download_dependencies(&AssetKey::from("pkg_c"), DownloadOptions::new());
    until("download start", || !service.download_ops("pkg_c").is_empty()).await;

    assert!(loader.downloads().cancel("pkg_c"));
    assert!(download.wait().await.is_canceled());

    let op = service.download_ops("pkg_c")[0].clone();
    until("download release", || op.releases() == 1).await;
    settle().await;
    assert_eq!(op.releases(), 1);
    assert!(!loader.downloads().cancel("pkg_c"));
}

#[tokio::test]
async fn repeated_retry_runs_one_attempt() {
    init_tracing();
    let service = MockService::new();
    service.script("pkg_r", |script| {
        script.size = 100;
        script.download_fails = true;
    });
    let loader = LoaderBuilder::new().build(service.clone());

    let retries = Arc::new(Mutex::new(Vec::<Retry>::new()));
    let options = DownloadOptions::new().with_on_fail({
        let retries = retries.clone();
        move |retry| retries.lock().push(retry)
    });
    let download = loader
        .downloads()
        .download_dependencies(&AssetKey::from("pkg_r"), options);
    until("failure hook", || retries.lock().len() == 1).await;

    service.script("pkg_r", |script| script.download_fails = false);
    let retry = retries.lock()[0].clone();
    retry.retry();
    retry.retry();

    assert!(download.wait().await.is_succeeded());
    settle().await;
    assert_eq!(service.size_ops("pkg_r").len(), 2);
    assert_eq!(service.download_ops("pkg_r").len(), 2);
}

#[tokio::test]
async fn negative_size_is_a_failure() {
    init_tracing();
    let service = MockService::new();
    service.script("pkg_n", |script| script.size = -1);
    let loader = LoaderBuilder::new().build(service.clone());

    let outcome = loader
        .downloads()
        .download_dependencies(&AssetKey::from("pkg_n"), DownloadOptions::new())
        .wait()
        .await;
    assert!(outcome.is_canceled());
    assert!(service.download_ops("pkg_n").is_empty());
    assert_eq!(service.size_ops("pkg_n")[0].releases(), 1);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let options = DownloadOptions::new().with_on_fail({
        let errors = errors.clone();
        move |retry| errors.lock().push(retry.error().clone())
    });
    let _download = loader
        .downloads()
        .download_dependencies(&AssetKey::from("pkg_n"), options);
    until("failure hook", || !errors.lock().is_empty()).await;

    match &errors.lock()[0] {
        Error::SizeQueryFailed { key, .. } => assert_eq!(key.as_str(), "pkg_n"),
        other => panic!("Unexpected error {:?}", other),
    }
    assert!(service.download_ops("pkg_n").is_empty());
}

#[tokio::test]
async fn failed_size_query_is_retried_through_hook() {
    init_tracing();
    let service = MockService::new();
    service.script("pkg_s", |script| script.size_fails = true);
    let loader = LoaderBuilder::new().build(service.clone());

    let retries = Arc::new(Mutex::new(Vec::<Retry>::new()));
    let options = DownloadOptions::new().with_on_fail({
        let retries = retries.clone();
        move |retry| retries.lock().push(retry)
    });
    let download = loader
        .downloads()
        .download_dependencies(&AssetKey::from("pkg_s"), options);
    until("failure hook", || retries.lock().len() == 1).await;
    assert!(matches!(
        retries.lock()[0].error(),
        Error::SizeQueryFailed { .. }
    ));
    assert_eq!(download.signal().state(), SignalState::Pending);

    service.script("pkg_s", |script| {
        script.size_fails = false;
        script.size = 256;
    });
    let retry = retries.lock()[0].clone();
    retry.retry();

    assert!(download.wait().await.is_succeeded());
    let sizes = service.size_ops("pkg_s");
    assert_eq!(sizes.len(), 2);
    assert!(sizes.iter().all(|op| op.releases() == 1));
    assert_eq!(service.download_ops("pkg_s").len(), 1);
}

#[tokio::test]
async fn zero_size_leaves_sub_progress_alone() {
    init_tracing();
    let service = MockService::new();
    let loader = LoaderBuilder::new().build(service.clone());

    let toggles = Arc::new(Mutex::new(Vec::new()));
    let (sub_progress, sub_log) = recorder();
    let options = DownloadOptions::new().with_sub_progress(
        {
            let toggles = toggles.clone();
            move |on| toggles.lock().push(on)
        },
        move |ratio| sub_progress(ratio),
    );

    let outcome = loader
        .downloads()
        .download_dependencies(&AssetKey::from("pkg_z"), options)
        .wait()
        .await;
    assert!(outcome.is_succeeded());
    assert!(toggles.lock().is_empty());
    assert!(sub_log.lock().is_empty());
}

#[tokio::test]
async fn joined_caller_gets_progress_and_failures() {
    init_tracing();
    let service = MockService::new();
    service.script("pkg_j", |script| {
        script.size = 100;
        script.download_fails = true;
    });
    let loader = LoaderBuilder::new().build(service.clone());
    let key = AssetKey::from("pkg_j");

    let (first_progress, first_log) = recorder();
    let first = loader.downloads().download_dependencies(
        &key,
        DownloadOptions {
            progress: Some(first_progress),
            ..DownloadOptions::default()
        },
    );

    let (second_progress, second_log) = recorder();
    let retries = Arc::new(Mutex::new(Vec::<Retry>::new()));
    let second = loader.downloads().download_dependencies(
        &key,
        DownloadOptions {
            progress: Some(second_progress),
            ..DownloadOptions::default()
        }
        .with_on_fail({
            let retries = retries.clone();
            move |retry| retries.lock().push(retry)
        }),
    );
    assert!(first.signal().ptr_eq(second.signal()));

    until("failure hook", || retries.lock().len() == 1).await;
    settle().await;
    assert_eq!(first.signal().state(), SignalState::Pending);
    assert!(!second_log.lock().is_empty());

    service.script("pkg_j", |script| script.download_fails = false);
    let retry = retries.lock()[0].clone();
    retry.retry();

    let (a, b) = futures_util::future::join(first.wait(), second.wait()).await;
    assert!(a.is_succeeded());
    assert!(b.is_succeeded());
    for log in &[first_log, second_log] {
        let log = log.lock();
        assert_non_decreasing(&log);
        assert_eq!(log.last(), Some(&1.0));
    }
    assert_eq!(service.download_ops("pkg_j").len(), 2);
}

#[tokio::test]
async fn download_runs_until_last_subscription_is_dropped() {
    init_tracing();
    let service = MockService::new();
    service.script("pkg_l", |script| {
        script.size = 5000;
        script.download_steps = vec![0.8; 200];
    });
    let loader = LoaderBuilder::new().build(service.clone());
    let key = AssetKey::from("pkg_l");

    let first = loader
        .downloads()
        .download_dependencies(&key, DownloadOptions::new());
    let second = loader
        .downloads()
        .download_dependencies(&key, DownloadOptions::new());
    until("download start", || !service.download_ops("pkg_l").is_empty()).await;

    drop(first);
    settle().await;
    assert!(loader.downloads().is_downloading("pkg_l"));
    assert_eq!(second.signal().state(), SignalState::Pending);

    let signal = second.signal().clone();
    drop(second);
    assert_eq!(signal.state(), SignalState::Canceled);
    assert!(!loader.downloads().is_downloading("pkg_l"));

    let op = service.download_ops("pkg_l")[0].clone();
    until("download release", || op.releases() == 1).await;
}
