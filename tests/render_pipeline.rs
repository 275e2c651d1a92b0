// tests/render_pipeline.rs

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use gdal::raster::{Buffer, GdalDataType};
use gdal::{Dataset, DriverManager};
use pop_tiles::source::LocalRasterSource;
use pop_tiles::{
    AccessToken, CancellationToken, CountryOutcome, Error, Legend, LegendEntry, RenderPipeline,
    RetryPolicy, Stage, TileService, TileUploader, TilesetNamer,
};
use tempfile::TempDir;

const WIDTH: usize = 8;
const HEIGHT: usize = 4;

/// Accepts every upload after replaying the scripted statuses.
struct FakeTileService {
    statuses: Mutex<VecDeque<u16>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeTileService {
    fn new(statuses: &[u16]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl TileService for FakeTileService {
    fn upload(
        &self,
        file: &Path,
        tileset_id: &str,
        name: &str,
        _token: &AccessToken,
    ) -> pop_tiles::Result<u16> {
        assert!(file.is_file(), "uploading missing file {:?}", file);
        self.calls
            .lock()
            .unwrap()
            .push((tileset_id.to_string(), name.to_string()));
        Ok(self.statuses.lock().unwrap().pop_front().unwrap_or(201))
    }
}

fn gdal_available() -> bool {
    DriverManager::get_driver_by_name("GTiff").is_ok()
}

/// Writes a WIDTH x HEIGHT float raster whose values ramp from -1 upwards.
fn write_population_raster(path: &Path) {
    let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
    let mut dataset = driver
        .create_with_band_type::<f32, _>(path, WIDTH, HEIGHT, 1)
        .unwrap();
    dataset
        .set_geo_transform(&[27.0, 0.001, 0.0, -28.5, 0.0, -0.001])
        .unwrap();
    let values: Vec<f32> = (0..WIDTH * HEIGHT).map(|i| i as f32 - 1.0).collect();
    let mut band = dataset.rasterband(1).unwrap();
    let mut buffer = Buffer::new((WIDTH, HEIGHT), values);
    band.write((0, 0), (WIDTH, HEIGHT), &mut buffer).unwrap();
}

fn legend() -> Legend {
    Legend::new(vec![
        LegendEntry::new(0.0, 10.0, [255, 255, 204], [254, 178, 76]),
        LegendEntry::new(10.0, 40.0, [254, 178, 76], [189, 0, 38]),
    ])
    .unwrap()
}

fn uploader(statuses: &[u16]) -> TileUploader<FakeTileService> {
    TileUploader::new(
        FakeTileService::new(statuses),
        TilesetNamer::new("humdata", 2020, Some(2020)),
        RetryPolicy {
            delay: Duration::ZERO,
            ..RetryPolicy::default()
        },
        CancellationToken::new(),
    )
}

/// Source directory with valid rasters for AAA and CCC and a corrupt one for BBB.
fn raster_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_population_raster(&dir.path().join("aaa_ppp_2020.tif"));
    fs::write(dir.path().join("bbb_ppp_2020.tif"), b"definitely not a tiff").unwrap();
    write_population_raster(&dir.path().join("ccc_ppp_2020.tif"));
    dir
}

fn countries(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|c| c.to_string()).collect()
}

#[test]
fn test_failed_country_does_not_abort_batch() {
    if !gdal_available() {
        eprintln!("Skipping test: GTiff driver not available");
        return;
    }
    let rasters = raster_dir();
    let work_dir = TempDir::new().unwrap();
    let pipeline = RenderPipeline::new(
        LocalRasterSource::new(rasters.path(), 2020),
        legend(),
        work_dir.path(),
        WIDTH,
        CancellationToken::new(),
    );
    let uploader = uploader(&[]);

    let report = pipeline.run(
        &countries(&["AAA", "BBB", "CCC"]),
        &uploader,
        &AccessToken::new("secret"),
    );

    let uploaded = report.uploaded();
    assert_eq!(
        uploaded.keys().cloned().collect::<Vec<_>>(),
        vec!["AAA".to_string(), "CCC".to_string()]
    );
    assert!(uploaded["AAA"].name.starts_with("aaa_ppp_2020-"));
    assert!(uploaded["CCC"].map_id.starts_with("humdata."));
    assert!(matches!(
        report.outcomes[1].1,
        CountryOutcome::RenderFailed {
            stage: Stage::Resampling,
            ..
        }
    ));
    assert_eq!(report.failures(), 1);
    assert_eq!(uploader.service().calls.lock().unwrap().len(), 2);
}

#[test]
fn test_missing_raster_is_fetch_failure() {
    let rasters = TempDir::new().unwrap();
    let work_dir = TempDir::new().unwrap();
    let pipeline = RenderPipeline::new(
        LocalRasterSource::new(rasters.path(), 2020),
        legend(),
        work_dir.path(),
        3000,
        CancellationToken::new(),
    );
    let uploader = uploader(&[]);

    let report = pipeline.run(&countries(&["ZZZ"]), &uploader, &AccessToken::new("secret"));

    assert!(matches!(report.outcomes[0].1, CountryOutcome::FetchFailed(_)));
    assert!(report.uploaded().is_empty());
    assert!(uploader.service().calls.lock().unwrap().is_empty());
}

#[test]
fn test_rendered_raster_is_rgba_and_downsampled() {
    if !gdal_available() {
        eprintln!("Skipping test: GTiff driver not available");
        return;
    }
    let rasters = raster_dir();
    let work_dir = TempDir::new().unwrap();
    let pipeline = RenderPipeline::new(
        LocalRasterSource::new(rasters.path(), 2020),
        legend(),
        work_dir.path(),
        WIDTH / 2,
        CancellationToken::new(),
    );

    let report = pipeline.render_all(&countries(&["AAA"]));
    let rendered: PathBuf = report.rendered()["AAA"].clone();
    assert_eq!(rendered, work_dir.path().join("aaa").join("aaa_render.tif"));

    let dataset = Dataset::open(&rendered).unwrap();
    assert_eq!(dataset.raster_size(), (WIDTH / 2, HEIGHT / 2));
    assert_eq!(dataset.raster_count(), 4);
    for i in 1..=4 {
        let band = dataset.rasterband(i).unwrap();
        assert_eq!(band.band_type(), GdalDataType::UInt8);
        assert_eq!(band.no_data_value(), None);
    }
    let transform = dataset.geo_transform().unwrap();
    assert!((transform[1] - 0.002).abs() < 1e-12);
}

#[test]
fn test_rendered_colors_follow_legend() {
    if !gdal_available() {
        eprintln!("Skipping test: GTiff driver not available");
        return;
    }
    let rasters = raster_dir();
    let work_dir = TempDir::new().unwrap();
    let pipeline = RenderPipeline::new(
        LocalRasterSource::new(rasters.path(), 2020),
        legend(),
        work_dir.path(),
        3000,
        CancellationToken::new(),
    );

    let rendered = pipeline.render_country("AAA").unwrap();
    assert_eq!((rendered.width, rendered.height), (WIDTH, HEIGHT));

    let dataset = Dataset::open(&rendered.path).unwrap();
    let read = |band: usize| -> Vec<u8> {
        let buffer = dataset
            .rasterband(band)
            .unwrap()
            .read_as::<u8>((0, 0), (WIDTH, HEIGHT), (WIDTH, HEIGHT), None)
            .unwrap();
        buffer.data().to_vec()
    };
    let (red, green, blue, alpha) = (read(1), read(2), read(3), read(4));

    // cell 0 is the -1 sentinel: transparent and unclassified
    assert_eq!([red[0], green[0], blue[0], alpha[0]], [0, 0, 0, 0]);
    // cell 1 is 0.0, the low end of the first entry
    assert_eq!([red[1], green[1], blue[1], alpha[1]], [255, 255, 204, 255]);
    // cell 11 is 10.0, the shared endpoint of both entries
    assert_eq!([red[11], green[11], blue[11]], [254, 178, 76]);
    // cell 31 is 30.0, inside the second entry only
    let expected = legend().color_of(30.0);
    assert_eq!([red[31], green[31], blue[31]], expected);
    assert_eq!(alpha[31], 255);
}

#[test]
fn test_conflicts_then_success_keeps_names() {
    if !gdal_available() {
        eprintln!("Skipping test: GTiff driver not available");
        return;
    }
    let rasters = raster_dir();
    let work_dir = TempDir::new().unwrap();
    let pipeline = RenderPipeline::new(
        LocalRasterSource::new(rasters.path(), 2020),
        legend(),
        work_dir.path(),
        3000,
        CancellationToken::new(),
    );
    let uploader = uploader(&[422, 422, 422, 201]);

    let report = pipeline.run(&countries(&["AAA"]), &uploader, &AccessToken::new("secret"));

    let tileset = report.uploaded()["AAA"].clone();
    let calls = uploader.service().calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 4);
    assert!(calls
        .iter()
        .all(|(id, name)| id == &tileset.map_id && name == &tileset.name));
}

#[test]
fn test_rejected_upload_does_not_stop_later_countries() {
    if !gdal_available() {
        eprintln!("Skipping test: GTiff driver not available");
        return;
    }
    let rasters = raster_dir();
    let work_dir = TempDir::new().unwrap();
    let pipeline = RenderPipeline::new(
        LocalRasterSource::new(rasters.path(), 2020),
        legend(),
        work_dir.path(),
        3000,
        CancellationToken::new(),
    );
    // AAA exhausts all six attempts, CCC goes through on its first
    let uploader = uploader(&[422; 6]);

    let report = pipeline.run(
        &countries(&["AAA", "CCC"]),
        &uploader,
        &AccessToken::new("secret"),
    );

    assert!(matches!(
        report.outcomes[0].1,
        CountryOutcome::UploadFailed(Error::UploadRejected { attempts: 6, .. })
    ));
    assert_eq!(
        report.uploaded().keys().cloned().collect::<Vec<_>>(),
        vec!["CCC".to_string()]
    );
    assert_eq!(report.failures(), 1);
    assert_eq!(uploader.service().calls.lock().unwrap().len(), 7);
}
