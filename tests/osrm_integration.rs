//! OSRM container test. Needs docker and a source directory whose `osrm/`
//! holds a contracted `roadnetwork.osrm` (CH), named by `OSRM_EAUL_SOURCE`.

use std::env;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use testcontainers::core::{IntoContainerPort, Mount};
use testcontainers::runners::SyncRunner;
use testcontainers::{Container, GenericImage, ImageExt, ReuseDirective, TestcontainersError};

use flood_eaul::cost_table::symmetric_entries;
use flood_eaul::inputs::{SourceFiles, load_od_points};
use flood_eaul::osrm::{OsrmClient, OsrmConfig};

fn source_dir() -> PathBuf {
    PathBuf::from(env::var("OSRM_EAUL_SOURCE").unwrap_or_else(|_| "eaul-data".to_string()))
}

fn osrm_container(files: &SourceFiles) -> Result<(Container<GenericImage>, String), TestcontainersError> {
    let data_dir = std::fs::canonicalize(&files.osrm)
        .map_err(|err| TestcontainersError::other(format!("OSRM data missing: {}", err)))?;

    let image = GenericImage::new("osrm/osrm-backend", "latest")
        .with_exposed_port(5000.tcp())
        .with_mount(Mount::bind_mount(data_dir.to_string_lossy().to_string(), "/data"))
        .with_cmd(vec![
            "osrm-routed",
            "--algorithm",
            "ch",
            "--max-table-size",
            "10000",
            "/data/roadnetwork.osrm",
        ])
        .with_container_name("osrm-eaul-baseline")
        .with_startup_timeout(Duration::from_secs(60))
        .with_reuse(ReuseDirective::Always);

    let container = image.start()?;
    let port = container.get_host_port_ipv4(5000.tcp())?;
    Ok((container, format!("http://127.0.0.1:{}", port)))
}

#[test]
#[ignore = "needs docker and a prepared OSRM dataset"]
fn osrm_table_covers_od_points() {
    let files = SourceFiles::new(&source_dir());
    let (container, base_url) = osrm_container(&files).expect("start OSRM container");
    let client = OsrmClient::new(OsrmConfig {
        base_url,
        profile: "car".to_string(),
        timeout_secs: 30,
    })
    .expect("build OSRM client");

    let started = Instant::now();
    while !client.is_ready() && started.elapsed() < Duration::from_secs(30) {
        std::thread::sleep(Duration::from_millis(500));
    }

    let od_points = load_od_points(&files.od).expect("od points");
    let coordinates: Vec<_> = od_points.iter().take(5).map(|point| point.coordinate).collect();
    let n = coordinates.len();

    let matrix = client.table(&coordinates).expect("table");
    assert_eq!(matrix.len(), n);
    assert!(matrix.iter().all(|row| row.len() == n));
    assert!((0..n).all(|i| matrix[i][i] == Some(0.0)));

    let entries = symmetric_entries(&matrix, 3600.0);
    assert_eq!(entries.len(), n * (n - 1) / 2);

    drop(container);
}
