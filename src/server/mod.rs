//! HTTP query surface over the hub, plus the imagery tile proxy.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::*;
use warp::http::StatusCode;
use warp::reply::Reply;
use warp::Filter;

use crate::config::{ImageryConfig, ServerConfig};
use crate::error::HubError;
use crate::geo::Geodetic;
use crate::hub::{HubHandle, VehicleKey};

pub mod tiles;

use tiles::{TileKind, TileProxy};

#[derive(Debug, Deserialize)]
struct KeyQuery {
    sysid: u8,
    compid: u8,
}

impl KeyQuery {
    fn key(&self) -> VehicleKey {
        VehicleKey::new(self.sysid, self.compid)
    }
}

#[derive(Debug, Deserialize)]
struct OriginQuery {
    lat_0: f64,
    long_0: f64,
    alt_0: f64,
}

impl OriginQuery {
    fn geodetic(&self) -> Geodetic {
        Geodetic::new(self.lat_0, self.long_0, self.alt_0)
    }
}

#[derive(Debug, Deserialize)]
struct TileQuery {
    lat: f64,
    long: f64,
    zoom: u8,
}

pub struct ServerTask {
    address: SocketAddr,
    hub: Option<HubHandle>,
    tiles: Option<Arc<TileProxy>>,
}

pub fn create_task(
    config: ServerConfig,
    imagery: Option<ImageryConfig>,
    hub: Option<HubHandle>,
) -> ServerTask {
    ServerTask {
        address: config.address,
        hub,
        tiles: imagery.map(|c| Arc::new(TileProxy::new(c))),
    }
}

#[async_trait]
impl crate::task::Task for ServerTask {
    fn name(&self) -> &'static str {
        "server"
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let Self {
            address,
            hub,
            tiles,
        } = *self;

        let (bound, serve_fut) = warp::serve(routes(hub, tiles))
            .try_bind_with_graceful_shutdown(address, async move { cancel.cancelled().await })
            .context("failed to bind http server")?;

        info!("listening on {bound}");
        serve_fut.await;

        Ok(())
    }
}

fn routes(
    hub: Option<HubHandle>,
    tiles: Option<Arc<TileProxy>>,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    let vehicles = warp::path!("api" / "vehicles").and(warp::get()).map({
        let hub = hub.clone();
        move || match &hub {
            Some(hub) => {
                let keys: Vec<String> = hub.vehicles().iter().map(ToString::to_string).collect();
                json_reply(&keys, StatusCode::OK)
            }
            None => error_reply(&HubError::TransportUnavailable),
        }
    });

    let vehicle = warp::path!("api" / "vehicle")
        .and(warp::get())
        .and(warp::query::<KeyQuery>())
        .map({
            let hub = hub.clone();
            move |q: KeyQuery| match &hub {
                Some(hub) => match hub.vehicle(q.key()) {
                    Ok(state) => json_reply(&state, StatusCode::OK),
                    Err(err) => error_reply(&err),
                },
                None => error_reply(&HubError::TransportUnavailable),
            }
        });

    let vehicle_relative = warp::path!("api" / "vehicle" / "relative")
        .and(warp::get())
        .and(warp::query::<KeyQuery>())
        .and(warp::query::<OriginQuery>())
        .map({
            let hub = hub.clone();
            move |q: KeyQuery, origin: OriginQuery| match &hub {
                Some(hub) => match hub.vehicle_relative(q.key(), origin.geodetic()) {
                    Ok(state) => json_reply(&state, StatusCode::OK),
                    Err(err) => error_reply(&err),
                },
                None => error_reply(&HubError::TransportUnavailable),
            }
        });

    let mission = warp::path!("api" / "mission")
        .and(warp::get())
        .and(warp::query::<KeyQuery>())
        .and(warp::query::<OriginQuery>())
        .and_then({
            let hub = hub.clone();
            move |q: KeyQuery, origin: OriginQuery| {
                let hub = hub.clone();
                async move {
                    let reply = match &hub {
                        Some(hub) => match hub.mission_plan(q.key(), origin.geodetic()).await {
                            Ok(plan) => json_reply(&plan, StatusCode::OK),
                            Err(err) => error_reply(&err),
                        },
                        None => error_reply(&HubError::TransportUnavailable),
                    };
                    Ok::<_, Infallible>(reply)
                }
            }
        });

    let elevation = tile_route("elevation", TileKind::Elevation, tiles.clone());
    let satellite = tile_route("satellite", TileKind::Satellite, tiles);

    vehicles
        .or(vehicle_relative)
        .or(vehicle)
        .or(mission)
        .or(elevation)
        .or(satellite)
}

fn tile_route(
    name: &'static str,
    kind: TileKind,
    tiles: Option<Arc<TileProxy>>,
) -> impl Filter<Extract = (warp::reply::Response,), Error = warp::Rejection> + Clone {
    warp::path("api")
        .and(warp::path(name))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<TileQuery>())
        .and_then(move |q: TileQuery| {
            let tiles = tiles.clone();
            async move {
                let reply = match &tiles {
                    Some(tiles) => match tiles.fetch(kind, q.lat, q.long, q.zoom).await {
                        Ok(tile) => tile_reply(tile, &q),
                        Err(err) => {
                            warn!("tile fetch failed: {err:#}");
                            json_reply(
                                &serde_json::json!({ "error": format!("{err:#}") }),
                                StatusCode::BAD_GATEWAY,
                            )
                        }
                    },
                    None => json_reply(
                        &serde_json::json!({ "error": "imagery access token not configured" }),
                        StatusCode::SERVICE_UNAVAILABLE,
                    ),
                };
                Ok::<_, Infallible>(reply)
            }
        })
}

fn tile_reply(tile: tiles::Tile, q: &TileQuery) -> warp::reply::Response {
    let (xfrac, yfrac) = tiles::deg2tile_fraction(q.lat, q.long, q.zoom);
    let (x, y) = tiles::deg2num(q.lat, q.long, q.zoom);

    // fractional position of the queried point within the returned tile
    warp::http::Response::builder()
        .header("content-type", tile.content_type)
        .header("x-tile-center-x", format!("{}", xfrac - x as f64))
        .header("x-tile-center-y", format!("{}", yfrac - y as f64))
        .body(tile.bytes.into())
        .expect("tile response construction cannot fail")
}

fn json_reply<T: serde::Serialize>(value: &T, status: StatusCode) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(value), status).into_response()
}

fn error_reply(err: &HubError) -> warp::reply::Response {
    let status = match err {
        HubError::UnknownVehicle => StatusCode::NOT_FOUND,
        HubError::TransportUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        HubError::MissionRetrievalStalled => StatusCode::GATEWAY_TIMEOUT,
        HubError::MalformedParameterValue { .. } => StatusCode::BAD_GATEWAY,
    };

    json_reply(&serde_json::json!({ "error": err.to_string() }), status)
}
