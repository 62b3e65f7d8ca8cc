pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use poem::{
    get,
    middleware::{CatchPanic, Tracing},
    post, Endpoint, EndpointExt, Route,
};

use crate::{config::AppConfig, core::converter::ConverterRegistry, storage::TempStorage};

pub struct AppState {
    pub storage: TempStorage,
    pub registry: ConverterRegistry,
    pub max_upload_bytes: u64,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Result<AppState> {
        let storage = TempStorage::new(&config.upload_dir).with_context(|| {
            format!(
                "cannot create uploads directory {}",
                config.upload_dir.display()
            )
        })?;

        Ok(AppState {
            storage,
            registry: ConverterRegistry::from_config(config),
            max_upload_bytes: config.max_upload_bytes,
        })
    }
}

pub fn app(state: AppState) -> impl Endpoint {
    Route::new()
        .at("/", get(api::index))
        .at("/health", get(api::health::health))
        .at("/convert", post(api::convert::convert))
        .with(Tracing)
        .with(CatchPanic::new())
        .data(Arc::new(state))
}
