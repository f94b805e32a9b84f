//! Device configuration aggregation.
//!
//! Participants record their microphone and camera selection per conference.
//! One person joining from several machines shows up under names like
//! `Ann`, `Ann_technical1`, `Ann_technical2`; the conference view merges
//! those rows into a single camera grid.

use crate::errors::CsError;
use crate::models::{Camera, DeviceConfiguration, DeviceConfigurationRow, GridSize};
use crate::repositories::Store;
use common::types::ConferenceId;
use std::sync::Arc;
use tracing::instrument;

/// Suffix marking an additional machine of the same person.
pub const TECHNICAL_SUFFIX: &str = "_technical";

/// Strip the `_technicalN` suffix from a display name.
pub fn normalize_display_name(name: &str) -> &str {
    match name.find(TECHNICAL_SUFFIX) {
        Some(index) => name.get(..index).unwrap_or(name),
        None => name,
    }
}

/// Parse the stored camera array. Malformed input yields an empty list.
pub fn parse_cameras(raw: &str) -> Vec<Camera> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Vec<Camera>>(raw) {
        Ok(cameras) => cameras,
        Err(e) => {
            tracing::warn!(
                target: "cs.devices",
                error = %e,
                "Unreadable camera configuration, treating as empty"
            );
            Vec::new()
        }
    }
}

fn from_row(row: DeviceConfigurationRow) -> DeviceConfiguration {
    DeviceConfiguration {
        cameras: parse_cameras(&row.camera_configuration),
        conference_id: row.conference_id,
        user_name: row.user_name,
        microphone_id: row.microphone_id,
        microphone_label: row.microphone_label,
        grid: row.grid,
    }
}

/// Combine several configurations of one person.
///
/// Cameras are concatenated in row order and each camera's `order` is
/// shifted by the number of cameras already placed, so a set of dense
/// per-row orders becomes one dense order. Identity fields come from the
/// first row.
pub fn merge_group(group: Vec<DeviceConfiguration>) -> Option<DeviceConfiguration> {
    let mut rows = group.into_iter();
    let mut merged = rows.next()?;

    let mut offset = i32::try_from(merged.cameras.len()).unwrap_or(i32::MAX);
    for row in rows {
        for camera in row.cameras {
            merged.cameras.push(Camera {
                order: camera.order.saturating_add(offset),
                ..camera
            });
        }
        offset = i32::try_from(merged.cameras.len()).unwrap_or(i32::MAX);
    }
    Some(merged)
}

/// Group configurations by normalized owner name and merge each group,
/// keeping groups in order of first appearance.
pub fn merge_by_owner(configurations: Vec<DeviceConfiguration>) -> Vec<DeviceConfiguration> {
    let mut groups: Vec<(String, Vec<DeviceConfiguration>)> = Vec::new();

    for configuration in configurations {
        let owner = normalize_display_name(&configuration.user_name).to_string();
        match groups.iter_mut().find(|(name, _)| *name == owner) {
            Some((_, group)) => group.push(configuration),
            None => groups.push((owner, vec![configuration])),
        }
    }

    groups
        .into_iter()
        .filter_map(|(_, group)| merge_group(group))
        .collect()
}

pub struct DeviceAggregator {
    store: Arc<dyn Store>,
}

impl DeviceAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Insert or replace the configuration for (conference, user name).
    #[instrument(skip_all, name = "cs.devices.save", fields(conference_id = %configuration.conference_id))]
    pub async fn save(
        &self,
        configuration: &DeviceConfiguration,
    ) -> Result<DeviceConfiguration, CsError> {
        let camera_configuration = serde_json::to_string(&configuration.cameras)
            .map_err(|e| CsError::Internal(format!("Camera serialization failed: {}", e)))?;

        let row = DeviceConfigurationRow {
            id: 0,
            conference_id: configuration.conference_id.clone(),
            user_name: configuration.user_name.clone(),
            microphone_id: configuration.microphone_id.clone(),
            microphone_label: configuration.microphone_label.clone(),
            camera_configuration,
            grid: configuration.grid,
        };

        let saved = self.store.upsert_device_configuration(&row).await?;
        tracing::debug!(
            target: "cs.devices",
            conference_id = %saved.conference_id,
            cameras = configuration.cameras.len(),
            "Saved device configuration"
        );
        Ok(from_row(saved))
    }

    /// Distinct rigs used by a person across conferences.
    ///
    /// Rows with the same microphone and grid shape count as the same rig;
    /// for each rig only the variant with the most cameras is kept.
    pub async fn for_user(&self, display_name: &str) -> Result<Vec<DeviceConfiguration>, CsError> {
        type RigKey = (Option<String>, Option<String>, GridSize);

        let rows = self.store.device_configurations_for_user(display_name).await?;

        let mut rigs: Vec<(RigKey, DeviceConfiguration)> = Vec::new();
        for configuration in rows.into_iter().map(from_row) {
            let key = (
                configuration.microphone_id.clone(),
                configuration.microphone_label.clone(),
                configuration.grid,
            );
            match rigs.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, kept)) => {
                    if configuration.cameras.len() > kept.cameras.len() {
                        *kept = configuration;
                    }
                }
                None => rigs.push((key, configuration)),
            }
        }

        Ok(rigs.into_iter().map(|(_, configuration)| configuration).collect())
    }

    /// All configurations of a conference, one per person.
    #[instrument(skip_all, name = "cs.devices.merge_by_conference", fields(conference_id = %conference_id))]
    pub async fn merge_by_conference(
        &self,
        conference_id: &ConferenceId,
    ) -> Result<Vec<DeviceConfiguration>, CsError> {
        let rows = self
            .store
            .device_configurations_for_conference(conference_id)
            .await?;

        Ok(merge_by_owner(rows.into_iter().map(from_row).collect()))
    }

    /// One participant's configuration in a conference.
    pub async fn config_for(
        &self,
        conference_id: &ConferenceId,
        display_name: &str,
    ) -> Result<DeviceConfiguration, CsError> {
        self.store
            .device_configuration(conference_id, display_name)
            .await?
            .map(from_row)
            .ok_or_else(|| CsError::NotFound("Device configuration not found".to_string()))
    }

    pub async fn delete_for_conference(&self, conference_id: &ConferenceId) -> Result<u64, CsError> {
        self.store.delete_device_configurations(conference_id).await
    }
}
