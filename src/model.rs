//! SunSpec model descriptors and whole-model decoding.
//!
//! A descriptor names a model's points in register order; offsets are
//! folded from the point sizes when a descriptor leaves them out and are
//! checked against the declared model length when it does not. Discovery
//! overlays the nominal base addresses with the ones a device actually
//! reports.

use crate::decode::{self, PointType, RawValue};
use crate::error::{Error, Result};
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Register access mode of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    R,
    Rw,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Access::R => "R",
            Access::Rw => "RW",
        })
    }
}

/// How a point's raw value maps to its engineering value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scale {
    /// Fixed power-of-ten exponent.
    Fixed(i16),
    /// Name of a sunssf sibling holding the exponent.
    Reference(String),
}

/// One field of a model: layout plus decoding metadata.
#[derive(Debug, Clone)]
pub struct Point {
    pub name: String,
    pub point_type: PointType,
    /// Width in registers.
    pub size: u16,
    /// Position relative to the model's base address.
    pub offset: u16,
    pub scale: Option<Scale>,
    pub label: Option<String>,
    pub units: Option<String>,
    pub access: Access,
}

/// A model descriptor with fully resolved point offsets.
#[derive(Debug, Clone)]
pub struct Model {
    pub id: u16,
    pub name: String,
    pub desc: Option<String>,
    /// Where the model sits when the device follows the descriptor.
    pub base_address: u16,
    /// Declared width in registers.
    pub length: u16,
    points: Vec<Point>,
}

impl Model {
    /// The points in register order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Looks up a point by name.
    pub fn point(&self, name: &str) -> Option<&Point> {
        self.points.iter().find(|point| point.name == name)
    }
}

/// Options controlling whole-model decoding.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    /// Resolve scale factors into engineering values.
    pub apply_scale: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { apply_scale: true }
    }
}

/// One decoded point of a model read.
#[derive(Debug, Clone)]
pub struct DecodedPoint {
    pub name: String,
    pub point_type: PointType,
    /// The value as it sits in the registers.
    pub raw: RawValue,
    /// The scaled engineering value, when the point carries a scale
    /// factor and scaling was requested.
    pub value: Option<f64>,
    pub units: Option<String>,
    pub access: Access,
    pub label: Option<String>,
}

/// A decoded model block. Points whose registers were not read are left
/// out rather than reported as zero.
#[derive(Debug, Clone)]
pub struct DecodedModel {
    pub model_id: u16,
    pub points: Vec<DecodedPoint>,
}

impl DecodedModel {
    /// Looks up a decoded point by name.
    pub fn point(&self, name: &str) -> Option<&DecodedPoint> {
        self.points.iter().find(|point| point.name == name)
    }
}

/// Descriptors for the inverter-control models 802, 805 and 899, compiled
/// into the library.
pub const BUILTIN_MODELS: &str = include_str!("models.json");

/// Registry of model descriptors and discovered instance addresses.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: BTreeMap<u16, Model>,
    instances: BTreeMap<u16, u16>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in inverter-control models.
    pub fn builtin() -> Self {
        Self::from_json(BUILTIN_MODELS).expect("built-in model descriptors are valid")
    }

    /// Parses a registry from descriptor JSON, validating every layout.
    pub fn from_json(text: &str) -> Result<Self> {
        let file: ModelFile = serde_json::from_str(text)?;
        let mut models = BTreeMap::new();
        for entry in file.models {
            let model = resolve(entry)?;
            let id = model.id;
            if models.insert(id, model).is_some() {
                return Err(Error::InvalidLayout {
                    model: id,
                    detail: "duplicate model id".into(),
                });
            }
        }
        Ok(Self {
            models,
            instances: BTreeMap::new(),
        })
    }

    /// Loads a registry from a descriptor file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Looks up a model descriptor.
    pub fn model(&self, model_id: u16) -> Option<&Model> {
        self.models.get(&model_id)
    }

    /// All descriptors in id order.
    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    /// The points of a model in register order.
    pub fn layout_for(&self, model_id: u16) -> Result<&[Point]> {
        self.models
            .get(&model_id)
            .map(|model| model.points.as_slice())
            .ok_or(Error::UnknownModel(model_id))
    }

    /// Where a model starts on the device: the discovered instance
    /// address when discovery has run, else the descriptor's nominal base.
    pub fn model_address(&self, model_id: u16) -> Result<u16> {
        let model = self
            .models
            .get(&model_id)
            .ok_or(Error::UnknownModel(model_id))?;
        Ok(self
            .instances
            .get(&model_id)
            .copied()
            .unwrap_or(model.base_address))
    }

    /// Absolute register address of one point, honoring discovered
    /// instances.
    pub fn field_address(&self, model_id: u16, point_name: &str) -> Result<u16> {
        let model = self
            .models
            .get(&model_id)
            .ok_or(Error::UnknownModel(model_id))?;
        let point = model.point(point_name).ok_or_else(|| Error::UnknownPoint {
            model: model_id,
            point: point_name.into(),
        })?;
        let base = self
            .instances
            .get(&model_id)
            .copied()
            .unwrap_or(model.base_address);
        base.checked_add(point.offset)
            .ok_or(Error::AddressRangeOverflow {
                address: base,
                count: point.offset,
            })
    }

    /// Records where a model actually lives on the device. Ids the
    /// registry does not know are ignored.
    pub fn record_instance(&mut self, model_id: u16, address: u16) {
        if self.models.contains_key(&model_id) {
            self.instances.insert(model_id, address);
        }
    }

    /// The discovered instance address of a model, if any.
    pub fn instance(&self, model_id: u16) -> Option<u16> {
        self.instances.get(&model_id).copied()
    }

    /// Forgets all discovered instance addresses.
    pub fn clear_instances(&mut self) {
        self.instances.clear();
    }

    /// Decodes a block of registers read from a model's base address.
    ///
    /// Scale-factor references are resolved against sibling points of the
    /// same read, so a truncated read can only ever omit values, never
    /// misscale them.
    pub fn decode_model(
        &self,
        model_id: u16,
        words: &[u16],
        options: DecodeOptions,
    ) -> Result<DecodedModel> {
        let model = self
            .models
            .get(&model_id)
            .ok_or(Error::UnknownModel(model_id))?;
        let mut raws: Vec<Option<RawValue>> = Vec::with_capacity(model.points.len());
        for point in &model.points {
            let raw = words
                .get(point.offset as usize..)
                .and_then(|tail| decode::decode_point(tail, point.point_type, point.size));
            if raw.is_none() {
                debug!(
                    "model {model_id}: point {:?} lies outside the {} words read, skipped",
                    point.name,
                    words.len()
                );
            }
            raws.push(raw);
        }
        let mut points = Vec::with_capacity(model.points.len());
        for (index, point) in model.points.iter().enumerate() {
            let Some(raw) = raws[index].clone() else {
                continue;
            };
            let value = if options.apply_scale {
                match &point.scale {
                    Some(Scale::Fixed(exponent)) => decode::apply_scale(&raw, *exponent),
                    Some(Scale::Reference(reference)) => {
                        resolve_exponent(model, &raws, reference)
                            .and_then(|exponent| decode::apply_scale(&raw, exponent))
                    }
                    None => None,
                }
            } else {
                None
            };
            points.push(DecodedPoint {
                name: point.name.clone(),
                point_type: point.point_type,
                raw,
                value,
                units: point.units.clone(),
                access: point.access,
                label: point.label.clone(),
            });
        }
        Ok(DecodedModel { model_id, points })
    }
}

fn resolve_exponent(model: &Model, raws: &[Option<RawValue>], reference: &str) -> Option<i16> {
    let index = model
        .points
        .iter()
        .position(|point| point.name == reference)?;
    let number = raws.get(index)?.as_ref()?.as_number()?;
    i16::try_from(number).ok()
}

#[derive(Deserialize)]
struct ModelFile {
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: u16,
    name: String,
    #[serde(default)]
    desc: Option<String>,
    base_address: u16,
    length: u16,
    points: Vec<PointEntry>,
}

#[derive(Deserialize)]
struct PointEntry {
    name: String,
    #[serde(rename = "type")]
    point_type: PointType,
    #[serde(default)]
    size: Option<u16>,
    #[serde(default)]
    offset: Option<u16>,
    #[serde(default)]
    scale: Option<Scale>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    units: Option<String>,
    access: Access,
}

fn invalid(model: u16, detail: String) -> Error {
    Error::InvalidLayout { model, detail }
}

/// Folds point offsets and checks the layout invariants: offsets must not
/// overlap or run backwards, and the layout must end exactly at the
/// declared model length.
fn resolve(entry: ModelEntry) -> Result<Model> {
    let id = entry.id;
    let mut points: Vec<Point> = Vec::with_capacity(entry.points.len());
    let mut cursor: u16 = 0;
    for point in entry.points {
        if points.iter().any(|seen| seen.name == point.name) {
            return Err(invalid(id, format!("duplicate point {:?}", point.name)));
        }
        let size = match (point.point_type.needs_size(), point.size) {
            (true, Some(size)) if size > 0 => size,
            (true, _) => {
                return Err(invalid(
                    id,
                    format!("string point {:?} needs a size", point.name),
                ));
            }
            (false, None) => point.point_type.words(0),
            (false, Some(size)) => {
                let natural = point.point_type.words(size);
                if size != natural {
                    return Err(invalid(
                        id,
                        format!(
                            "point {:?} declares size {size} but {} occupies {natural}",
                            point.name, point.point_type
                        ),
                    ));
                }
                size
            }
        };
        let offset = match point.offset {
            Some(explicit) if explicit < cursor => {
                return Err(invalid(
                    id,
                    format!(
                        "point {:?} at offset {explicit} overlaps the point before it",
                        point.name
                    ),
                ));
            }
            Some(explicit) => explicit,
            None => cursor,
        };
        cursor = offset.checked_add(size).ok_or_else(|| {
            invalid(id, format!("point {:?} runs past the register space", point.name))
        })?;
        points.push(Point {
            name: point.name,
            point_type: point.point_type,
            size,
            offset,
            scale: point.scale,
            label: point.label,
            units: point.units,
            access: point.access,
        });
    }
    if cursor != entry.length {
        return Err(invalid(
            id,
            format!(
                "points cover {cursor} registers but the model declares {}",
                entry.length
            ),
        ));
    }
    for point in &points {
        if let Some(Scale::Reference(reference)) = &point.scale {
            if !points.iter().any(|seen| &seen.name == reference) {
                return Err(invalid(
                    id,
                    format!(
                        "point {:?} references scale factor {reference:?} which does not exist",
                        point.name
                    ),
                ));
            }
        }
    }
    Ok(Model {
        id,
        name: entry.name,
        desc: entry.desc,
        base_address: entry.base_address,
        length: entry.length,
        points,
    })
}
