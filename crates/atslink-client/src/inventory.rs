//! Entity inventory: names, valid sets and the zone-to-areas map.
//!
//! Names come in pages of 16 (standard) or 4 (extended format). The
//! pagination strategy depends on what is known: with a valid set, only
//! the covering pages are fetched; with a known maximum (areas, zones),
//! pages run up to it; otherwise (outputs, triggers, doors, filters)
//! pages are probed until one comes back empty or the hard cap of 256.

use std::collections::{BTreeMap, BTreeSet};

use atslink_proto::batch::{build_batch, split_batch};
use atslink_proto::messages::{
    BATCH_ZONES_REQUEST_LEN, GET_NAMES, GET_NAMES_EXTENDED, GET_VALID_AREAS, GET_ZONES_ASSIGNED,
    VALID_AREAS_BITSET_OFFSET, ZONES_ASSIGNED_BITSET, name_page_layout,
};
use atslink_proto::template::{Template, Value, fixed_str, numbers_from_bitmap};
use atslink_proto::EntityKind;
use tracing::{debug, warn};

use crate::client::{Client, NameMap, response_payload};
use crate::error::ClientError;

/// Hard cap on probing pagination for kinds without a known maximum.
const NAME_PROBE_CAP: u16 = 256;

/// Everything the client knows about the panel's configured entities.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Configured names per kind and number.
    pub names: BTreeMap<EntityKind, NameMap>,
    /// Valid entity numbers per kind.
    pub valid: BTreeMap<EntityKind, BTreeSet<u16>>,
    /// Which areas each zone belongs to.
    pub zone_areas: BTreeMap<u16, BTreeSet<u16>>,
}

impl Inventory {
    /// Name of one entity, when configured.
    #[must_use]
    pub fn name_of(&self, kind: EntityKind, id: u16) -> Option<String> {
        self.names.get(&kind).and_then(|m| m.get(&id)).cloned()
    }

    /// Names of one kind, empty map when not loaded.
    #[must_use]
    pub fn names_of(&self, kind: EntityKind) -> NameMap {
        self.names.get(&kind).cloned().unwrap_or_default()
    }
}

impl Client {
    /// Query names, valid sets and the zone map for every entity kind.
    ///
    /// Call once after connecting; the monitor and the status queries
    /// work from this snapshot.
    pub async fn load_inventory(&mut self) -> Result<(), ClientError> {
        let valid_areas = self.query_valid_areas().await?;
        let (valid_zones, zone_areas) = self.query_zones_for_areas(&valid_areas).await?;

        let mut inventory = Inventory {
            zone_areas,
            ..Inventory::default()
        };

        let area_names = self.query_names(EntityKind::Area, Some(&valid_areas)).await?;
        let zone_names = self.query_names(EntityKind::Zone, Some(&valid_zones)).await?;
        inventory.names.insert(EntityKind::Area, area_names);
        inventory.names.insert(EntityKind::Zone, zone_names);
        inventory.valid.insert(EntityKind::Area, valid_areas);
        inventory.valid.insert(EntityKind::Zone, valid_zones);

        // No validity query exists for the remaining kinds; whatever has
        // a name is considered valid
        for kind in
            [EntityKind::Output, EntityKind::Trigger, EntityKind::Door, EntityKind::Filter]
        {
            let names = self.query_names(kind, None).await?;
            inventory.valid.insert(kind, names.keys().copied().collect());
            inventory.names.insert(kind, names);
        }

        debug!(
            areas = inventory.valid[&EntityKind::Area].len(),
            zones = inventory.valid[&EntityKind::Zone].len(),
            "inventory loaded"
        );
        self.inventory = inventory;
        Ok(())
    }

    /// Which area numbers exist. Extended-family panels have no query for
    /// this and report 1..=max.
    pub(crate) async fn query_valid_areas(&self) -> Result<BTreeSet<u16>, ClientError> {
        if self.panel.is_extended_family() {
            return Ok((1..=self.panel.max_areas).collect());
        }

        let reply = self.call(&GET_VALID_AREAS, &[]).await?;
        let payload = response_payload(&reply)?;
        let bitset = payload.get(VALID_AREAS_BITSET_OFFSET..).unwrap_or_default();
        Ok(numbers_from_bitmap(bitset).into_iter().collect())
    }

    /// Union of each area's zone bitset, plus the zone-to-areas map.
    /// Batched when more than one area; a batch-parse failure falls back
    /// to per-area queries.
    pub(crate) async fn query_zones_for_areas(
        &self,
        areas: &BTreeSet<u16>,
    ) -> Result<(BTreeSet<u16>, BTreeMap<u16, BTreeSet<u16>>), ClientError> {
        let list: Vec<u16> = areas.iter().copied().collect();

        if list.len() > 1 {
            match self.zones_batched(&list).await {
                Ok(result) => return Ok(result),
                Err(ClientError::Protocol(_)) | Err(ClientError::MalformedResponse { .. }) => {
                    warn!("batched zone query failed to parse, falling back to per-area queries");
                },
                Err(e) => return Err(e),
            }
        }

        let mut valid = BTreeSet::new();
        let mut map: BTreeMap<u16, BTreeSet<u16>> = BTreeMap::new();
        for &area in &list {
            let reply = self
                .call(&GET_ZONES_ASSIGNED, &[("area", Value::Int(u64::from(area)))])
                .await?;
            let zones = parse_zone_bitset(response_payload(&reply)?)?;
            merge_zones(&mut valid, &mut map, area, &zones);
        }
        Ok((valid, map))
    }

    async fn zones_batched(
        &self,
        areas: &[u16],
    ) -> Result<(BTreeSet<u16>, BTreeMap<u16, BTreeSet<u16>>), ClientError> {
        let mut requests = Vec::with_capacity(areas.len());
        for &area in areas {
            requests
                .push(GET_ZONES_ASSIGNED.construct(&[("area", Value::Int(u64::from(area)))])?);
        }
        let batch = build_batch(&requests, BATCH_ZONES_REQUEST_LEN)?;
        let reply = self.transport.call_encrypted(&batch, true).await?;
        let parts = split_batch(&reply)?;

        if parts.len() != areas.len() {
            return Err(ClientError::MalformedResponse {
                operation: "get_zones_assigned",
                reason: format!("{} replies for {} areas", parts.len(), areas.len()),
            });
        }

        let mut valid = BTreeSet::new();
        let mut map: BTreeMap<u16, BTreeSet<u16>> = BTreeMap::new();
        // Replies come back in request order
        for (&area, part) in areas.iter().zip(&parts) {
            let zones = parse_zone_bitset(part)?;
            merge_zones(&mut valid, &mut map, area, &zones);
        }
        Ok((valid, map))
    }

    /// Fetch names for `kind`, optionally restricted to a valid set.
    pub(crate) async fn query_names(
        &self,
        kind: EntityKind,
        valid: Option<&BTreeSet<u16>>,
    ) -> Result<NameMap, ClientError> {
        let extended = self.panel.uses_extended_names();
        let page_size = if extended {
            name_page_layout::EXT_PAGE_SIZE as u16
        } else {
            name_page_layout::STD_PAGE_SIZE as u16
        };

        let mut names = NameMap::new();

        if let Some(valid) = valid.filter(|v| !v.is_empty()) {
            // Minimal covering set of page starts
            let starts: BTreeSet<u16> =
                valid.iter().map(|n| ((n - 1) / page_size) * page_size).collect();
            for start in starts {
                for (id, name) in self.fetch_name_page(kind, start, extended).await? {
                    if valid.contains(&id) {
                        names.insert(id, name);
                    }
                }
            }
            return Ok(names);
        }

        if let Some(max) = self.known_max(kind) {
            let mut start = 0u16;
            while start < max {
                for (id, name) in self.fetch_name_page(kind, start, extended).await? {
                    names.insert(id, name);
                }
                start += page_size;
            }
            return Ok(names);
        }

        // Probe until an empty page or the cap
        let mut start = 0u16;
        while start < NAME_PROBE_CAP {
            let page = self.fetch_name_page(kind, start, extended).await?;
            if page.is_empty() {
                break;
            }
            names.extend(page);
            start += page_size;
        }
        Ok(names)
    }

    fn known_max(&self, kind: EntityKind) -> Option<u16> {
        match kind {
            EntityKind::Area => Some(self.panel.max_areas),
            EntityKind::Zone => Some(self.panel.max_zones),
            _ => None,
        }
    }

    /// One name page; entries with empty names are dropped.
    async fn fetch_name_page(
        &self,
        kind: EntityKind,
        start: u16,
        extended: bool,
    ) -> Result<Vec<(u16, String)>, ClientError> {
        let template: &Template = if extended { &GET_NAMES_EXTENDED } else { &GET_NAMES };
        let reply = self
            .call(template, &[
                ("kind", Value::Int(u64::from(kind.type_tag()))),
                ("index", Value::Int(u64::from(start))),
            ])
            .await?;
        let payload = response_payload(&reply)?;

        if payload.first() != template.msg_id.first() || payload.get(1) != Some(&kind.type_tag())
        {
            return Err(ClientError::MalformedResponse {
                operation: "get_names",
                reason: format!("unexpected reply {payload:02x?}"),
            });
        }

        let count = usize::from(payload.get(2).copied().unwrap_or(0));
        let (num_len, name_len, page_size) = if extended {
            (2, name_page_layout::EXT_NAME_LEN, name_page_layout::EXT_PAGE_SIZE)
        } else {
            (1, name_page_layout::STD_NAME_LEN, name_page_layout::STD_PAGE_SIZE)
        };

        let mut out = Vec::new();
        for i in 0..count.min(page_size) {
            let at = name_page_layout::ENTRIES + i * (num_len + name_len);
            let id = if extended {
                let lo = payload.get(at).copied();
                let hi = payload.get(at + 1).copied();
                match (lo, hi) {
                    (Some(lo), Some(hi)) => u16::from_le_bytes([lo, hi]),
                    _ => break,
                }
            } else {
                match payload.get(at) {
                    Some(&b) => u16::from(b),
                    None => break,
                }
            };
            let Some(name) = fixed_str(payload, at + num_len, name_len) else {
                break;
            };
            if id != 0 && !name.is_empty() {
                out.push((id, name));
            }
        }
        Ok(out)
    }
}

fn parse_zone_bitset(payload: &[u8]) -> Result<Vec<u16>, ClientError> {
    if !GET_ZONES_ASSIGNED.matches(payload, 0) {
        return Err(ClientError::MalformedResponse {
            operation: "get_zones_assigned",
            reason: format!("unexpected reply {payload:02x?}"),
        });
    }
    let bitset = payload.get(ZONES_ASSIGNED_BITSET).ok_or_else(|| {
        ClientError::MalformedResponse {
            operation: "get_zones_assigned",
            reason: "reply too short for the zone bitset".to_string(),
        }
    })?;
    Ok(numbers_from_bitmap(bitset))
}

fn merge_zones(
    valid: &mut BTreeSet<u16>,
    map: &mut BTreeMap<u16, BTreeSet<u16>>,
    area: u16,
    zones: &[u16],
) {
    for &zone in zones {
        valid.insert(zone);
        map.entry(zone).or_default().insert(area);
    }
}
