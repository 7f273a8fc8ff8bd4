use std::fs;
use std::io;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::info;

use crate::monitor::{Context, Monitor, MonitorKind};

/// Expires old uploads, then removes the blobs of uploads past their deletion grace period
pub struct UploadMonitor {
    ctx: Arc<Context>,
}

impl UploadMonitor {
    pub fn new(ctx: Arc<Context>) -> UploadMonitor {
        UploadMonitor { ctx }
    }
}

#[async_trait]
impl Monitor for UploadMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Upload
    }

    async fn tick(&self) -> Result<()> {
        let ctx = &self.ctx;
        let lifecycle = &ctx.config.lifecycle;

        let expired = ctx.store.expire_uploads(&(Utc::now() - Duration::days(lifecycle.upload_ttl_days)))?;
        if !expired.is_empty() {
            info!("{} uploads expired", expired.len());
        }

        let cutoff = Utc::now() - Duration::days(lifecycle.upload_delete_grace_days);
        for upload in ctx.store.deleted_uploads_before(&cutoff)? {
            let blob = ctx.config.uploads_dir.join(&upload.code);
            info!("Removing upload {} ({})", upload.code, upload.name);
            match fs::remove_file(&blob) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => {
                    return Err(err).with_context(|| format!("Can't remove {}", blob.display()));
                }
                _ => {}
            }
            ctx.store.delete_upload(&upload.code)?;
        }
        Ok(())
    }
}
