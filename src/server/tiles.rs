use anyhow::Context;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::*;

use crate::config::ImageryConfig;

/// Which imagery layer a tile request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Elevation,
    Satellite,
}

impl TileKind {
    fn url(&self, zoom: u8, x: u32, y: u32) -> String {
        match self {
            TileKind::Elevation => format!(
                "https://api.mapbox.com/v4/mapbox.mapbox-terrain-dem-v1/{zoom}/{x}/{y}.pngraw"
            ),
            TileKind::Satellite => {
                format!("https://api.mapbox.com/v4/mapbox.satellite/{zoom}/{x}/{y}.jpg")
            }
        }
    }
}

pub struct Tile {
    pub bytes: Bytes,
    pub content_type: String,
}

struct CachedTile {
    kind: TileKind,
    zoom: u8,
    x: u32,
    y: u32,
    bytes: Bytes,
    content_type: String,
}

/// Stateless passthrough to the imagery service, with the single most recent
/// tile cached so a map view polling the same spot does not re-fetch it.
pub struct TileProxy {
    http: reqwest::Client,
    access_token: String,
    cache: Mutex<Option<CachedTile>>,
}

impl TileProxy {
    pub fn new(config: ImageryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token: config.access_token,
            cache: Mutex::new(None),
        }
    }

    pub async fn fetch(&self, kind: TileKind, lat: f64, lon: f64, zoom: u8) -> anyhow::Result<Tile> {
        let (x, y) = deg2num(lat, lon, zoom);

        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.as_ref() {
                if cached.kind == kind && cached.zoom == zoom && cached.x == x && cached.y == y {
                    trace!(?kind, zoom, x, y, "serving tile from cache");
                    return Ok(Tile {
                        bytes: cached.bytes.clone(),
                        content_type: cached.content_type.clone(),
                    });
                }
            }
        }

        debug!(?kind, zoom, x, y, "fetching tile from imagery service");

        let response = self
            .http
            .get(kind.url(zoom, x, y))
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await
            .context("failed to reach imagery service")?
            .error_for_status()
            .context("imagery service rejected tile request")?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_owned();

        let bytes = response
            .bytes()
            .await
            .context("failed to read tile body")?;

        let mut cache = self.cache.lock().await;
        *cache = Some(CachedTile {
            kind,
            zoom,
            x,
            y,
            bytes: bytes.clone(),
            content_type: content_type.clone(),
        });

        Ok(Tile {
            bytes,
            content_type,
        })
    }
}

/// Web-Mercator tile coordinates of a geodetic point, as fractions so callers
/// can also locate the point within the tile.
pub fn deg2tile_fraction(lat_deg: f64, lon_deg: f64, zoom: u8) -> (f64, f64) {
    let lat_rad = lat_deg.to_radians();
    let n = (1u32 << zoom) as f64;
    let xfrac = (lon_deg + 180.0) / 360.0 * n;
    let yfrac = (1.0 - lat_rad.tan().asinh() / std::f64::consts::PI) / 2.0 * n;
    (xfrac, yfrac)
}

pub fn deg2num(lat_deg: f64, lon_deg: f64, zoom: u8) -> (u32, u32) {
    let (xfrac, yfrac) = deg2tile_fraction(lat_deg, lon_deg, zoom);
    (xfrac as u32, yfrac as u32)
}
