//! Fuzzable parameter discovery over route XML documents.
//!
//! A parameter is fuzzable only when its element carries an explicit marker attribute
//! (`fuzz="true"`, or the `mutable` alias). Discovery and vector write-back share one
//! document scan so positional alignment between the two can never drift.

use std::{
    fs,
    path::{Path, PathBuf},
};

use quick_xml::events::{attributes::Attribute, BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;

use crate::error::DiscoveryError;
use crate::model::ParameterSpec;
use crate::ranges::classify;

const MARKER_ATTRIBUTES: [&str; 2] = ["fuzz", "mutable"];
const SKIPPED_SCENARIO_SUFFIX: &str = "Data_Collect";

#[derive(Clone, Debug)]
pub struct ScenarioDescription {
    pub xml: String,
    /// Restrict discovery to one `<route id=...>`. `None` scans every route.
    pub route_id: Option<String>,
    pub source: Option<PathBuf>,
}

impl ScenarioDescription {
    pub fn new(xml: impl Into<String>, route_id: Option<String>) -> Self {
        Self {
            xml: xml.into(),
            route_id,
            source: None,
        }
    }

    pub fn from_file(path: &Path, route_id: Option<String>) -> Result<Self, DiscoveryError> {
        let xml = fs::read_to_string(path).map_err(|e| DiscoveryError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            xml,
            route_id,
            source: Some(path.to_path_buf()),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiscoveredScenario {
    pub town: Option<String>,
    /// Type of the first scenario that declares a fuzzable parameter.
    pub scenario_type: String,
    /// Document order; bounds are left at zero until range resolution.
    pub parameters: Vec<ParameterSpec>,
}

struct MarkedParameter<'a> {
    index: usize,
    name: &'a str,
    scenario_instance: &'a str,
    scenario_type: &'a str,
    raw_value: Option<String>,
}

struct ScenarioFrame {
    name: String,
    scenario_type: String,
    skipped: bool,
}

struct ScanOutput {
    xml: String,
    town: Option<String>,
    marked: usize,
}

pub fn discover(description: &ScenarioDescription) -> Result<DiscoveredScenario, DiscoveryError> {
    let mut parameters = Vec::new();
    let scan = scan(
        &description.xml,
        description.route_id.as_deref(),
        |marked| {
            let current_value = parse_value(marked)?;
            parameters.push(ParameterSpec {
                name: marked.name.to_string(),
                scenario_instance: marked.scenario_instance.to_string(),
                scenario_type: marked.scenario_type.to_string(),
                current_value,
                lower_bound: 0.0,
                upper_bound: 0.0,
                semantic_type: classify(marked.name),
            });
            Ok(None)
        },
    )?;

    let Some(first) = parameters.first() else {
        return Err(DiscoveryError::NoMutableParameters);
    };
    let scenario_type = first.scenario_type.clone();

    tracing::debug!(
        parameters = parameters.len(),
        scenario_type = %scenario_type,
        town = ?scan.town,
        "discovered fuzzable parameters"
    );

    Ok(DiscoveredScenario {
        town: scan.town,
        scenario_type,
        parameters,
    })
}

/// Write `vector` into the `value` attributes of the marked parameters, in discovery
/// order, and return the rewritten document.
pub fn apply_vector(
    description: &ScenarioDescription,
    vector: &[f64],
) -> Result<String, DiscoveryError> {
    let scan = scan(
        &description.xml,
        description.route_id.as_deref(),
        |marked| Ok(vector.get(marked.index).map(|v| format!("{v}"))),
    )?;

    if scan.marked != vector.len() {
        return Err(DiscoveryError::VectorLength {
            expected: scan.marked,
            actual: vector.len(),
        });
    }
    Ok(scan.xml)
}

fn parse_value(marked: &MarkedParameter<'_>) -> Result<f64, DiscoveryError> {
    let raw = marked.raw_value.as_deref().unwrap_or("");
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DiscoveryError::NonNumeric {
            scenario: marked.scenario_instance.to_string(),
            parameter: marked.name.to_string(),
            value: raw.to_string(),
        })
}

fn xml_error(e: impl std::fmt::Display) -> DiscoveryError {
    DiscoveryError::Xml {
        reason: e.to_string(),
    }
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Result<Option<String>, DiscoveryError> {
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.as_ref() == key.as_bytes() {
            return Ok(Some(attr.unescape_value().map_err(xml_error)?.into_owned()));
        }
    }
    Ok(None)
}

fn is_marked(e: &BytesStart<'_>) -> Result<bool, DiscoveryError> {
    for key in MARKER_ATTRIBUTES {
        if let Some(value) = attribute(e, key)? {
            let value = value.trim().to_ascii_lowercase();
            if matches!(value.as_str(), "true" | "1" | "yes") {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn with_value(e: &BytesStart<'_>, value: &str) -> Result<BytesStart<'static>, DiscoveryError> {
    let mut rewritten = BytesStart::new(element_name(e));
    let mut replaced = false;
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.as_ref() == b"value" {
            rewritten.push_attribute(("value", value));
            replaced = true;
        } else {
            rewritten.push_attribute(Attribute {
                key: attr.key,
                value: attr.value,
            });
        }
    }
    if !replaced {
        rewritten.push_attribute(("value", value));
    }
    Ok(rewritten.into_owned())
}

/// Walk the document, calling `on_marked` for every fuzzable parameter in document order.
/// When the callback returns a value, the element's `value` attribute is rewritten in the
/// returned copy of the document.
fn scan<F>(xml: &str, route_id: Option<&str>, mut on_marked: F) -> Result<ScanOutput, DiscoveryError>
where
    F: FnMut(&MarkedParameter<'_>) -> Result<Option<String>, DiscoveryError>,
{
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));

    let mut stack: Vec<String> = Vec::new();
    let mut in_route = false;
    let mut route_found = route_id.is_none();
    let mut town = None;
    let mut scenario: Option<ScenarioFrame> = None;
    let mut marked = 0usize;

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        let mut replacement: Option<Event<'static>> = None;

        match &event {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                let name = element_name(e);
                let parent = stack.last().map(String::as_str);
                let is_empty = matches!(event, Event::Empty(_));

                if name == "route" {
                    let id = attribute(e, "id")?;
                    in_route = match route_id {
                        Some(wanted) => id.as_deref() == Some(wanted),
                        None => true,
                    };
                    if in_route {
                        route_found = true;
                        if town.is_none() {
                            town = attribute(e, "town")?;
                        }
                    }
                } else if name == "scenario" && parent == Some("scenarios") && in_route {
                    let scenario_type = attribute(e, "type")?.unwrap_or_default();
                    let frame = ScenarioFrame {
                        name: attribute(e, "name")?.unwrap_or_default(),
                        skipped: scenario_type.ends_with(SKIPPED_SCENARIO_SUFFIX),
                        scenario_type,
                    };
                    if frame.skipped {
                        tracing::debug!(scenario = %frame.name, "skipping data collection scenario");
                    }
                    if !is_empty {
                        scenario = Some(frame);
                    }
                } else if parent == Some("scenario") && name != "trigger_point" {
                    if let Some(frame) = scenario.as_ref().filter(|f| !f.skipped) {
                        if is_marked(e)? {
                            let parameter = MarkedParameter {
                                index: marked,
                                name: &name,
                                scenario_instance: &frame.name,
                                scenario_type: &frame.scenario_type,
                                raw_value: attribute(e, "value")?,
                            };
                            marked += 1;
                            if let Some(value) = on_marked(&parameter)? {
                                let rewritten = with_value(e, &value)?;
                                replacement = Some(if is_empty {
                                    Event::Empty(rewritten)
                                } else {
                                    Event::Start(rewritten)
                                });
                            }
                        }
                    }
                }

                if !is_empty {
                    stack.push(name);
                }
            }
            Event::End(_) => {
                if let Some(name) = stack.pop() {
                    match name.as_str() {
                        "scenario" => scenario = None,
                        "route" => in_route = false,
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        match replacement {
            Some(rewritten) => writer.write_event(rewritten).map_err(xml_error)?,
            None => writer.write_event(event).map_err(xml_error)?,
        }
    }

    if let Some(open) = stack.last() {
        return Err(xml_error(format!("element <{open}> is never closed")));
    }
    if !route_found {
        return Err(DiscoveryError::RouteNotFound {
            route_id: route_id.unwrap_or_default().to_string(),
        });
    }

    let xml = String::from_utf8(writer.into_inner()).map_err(xml_error)?;
    Ok(ScanOutput { xml, town, marked })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SemanticType;

    const ROUTE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<routes>
  <route id="7" town="Town05">
    <scenarios>
      <scenario name="CutIn_1" type="ParkingCutIn">
        <trigger_point x="1.0" y="2.0" z="0.0" yaw="90" fuzz="true"/>
        <absolute_v value="15.0" fuzz="true"/>
        <direction value="right"/>
        <relative_p value="30" mutable="yes"/>
      </scenario>
      <scenario name="Collect" type="Town05_Data_Collect">
        <v_ego value="8.0" fuzz="true"/>
      </scenario>
      <scenario name="Junction_1" type="SignalizedJunctionLeftTurn">
        <reaction_time value="0.8" fuzz="true"/>
      </scenario>
    </scenarios>
  </route>
  <route id="8" town="Town03">
    <scenarios>
      <scenario name="Other" type="Accident">
        <distance value="40" fuzz="true"/>
      </scenario>
    </scenarios>
  </route>
</routes>
"#;

    fn description(route: Option<&str>) -> ScenarioDescription {
        ScenarioDescription::new(ROUTE_XML, route.map(str::to_string))
    }

    #[test]
    fn discovers_marked_parameters_in_document_order() {
        let found = discover(&description(Some("7"))).unwrap();
        assert_eq!(found.town.as_deref(), Some("Town05"));
        assert_eq!(found.scenario_type, "ParkingCutIn");

        let names: Vec<_> = found.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["absolute_v", "relative_p", "reaction_time"]);
        assert_eq!(found.parameters[0].current_value, 15.0);
        assert_eq!(found.parameters[0].semantic_type, SemanticType::Velocity);
        assert_eq!(found.parameters[2].scenario_type, "SignalizedJunctionLeftTurn");
        assert_eq!(found.parameters[2].scenario_instance, "Junction_1");
    }

    #[test]
    fn discovery_is_idempotent() {
        let desc = description(None);
        assert_eq!(discover(&desc).unwrap(), discover(&desc).unwrap());
    }

    #[test]
    fn unknown_route_is_an_error() {
        let err = discover(&description(Some("99"))).unwrap_err();
        assert_eq!(
            err,
            DiscoveryError::RouteNotFound {
                route_id: "99".to_string()
            }
        );
    }

    #[test]
    fn no_marked_parameters_is_an_error() {
        let xml = r#"<routes><route id="1" town="Town01"><scenarios>
            <scenario name="S" type="CutIn"><absolute_v value="3"/></scenario>
        </scenarios></route></routes>"#;
        let err = discover(&ScenarioDescription::new(xml, None)).unwrap_err();
        assert_eq!(err, DiscoveryError::NoMutableParameters);
    }

    #[test]
    fn non_numeric_marked_value_is_an_error() {
        let xml = r#"<routes><route id="1"><scenarios>
            <scenario name="S" type="CutIn"><direction value="left" fuzz="true"/></scenario>
        </scenarios></route></routes>"#;
        let err = discover(&ScenarioDescription::new(xml, None)).unwrap_err();
        assert!(matches!(err, DiscoveryError::NonNumeric { .. }));
    }

    #[test]
    fn unclosed_scenario_element_is_malformed() {
        let mismatched = r#"<routes><route id="1"><scenarios>
            <scenario name="S" type="CutIn"><absolute_v value="1" fuzz="true"/>
        </scenarios></route></routes>"#;
        let err = discover(&ScenarioDescription::new(mismatched, None)).unwrap_err();
        assert!(matches!(err, DiscoveryError::Xml { .. }));
        assert!(err.to_string().contains("malformed scenario description"));

        let truncated = r#"<routes><route id="1"><scenarios>
            <scenario name="S" type="CutIn"><absolute_v value="1" fuzz="true"/>"#;
        let err = discover(&ScenarioDescription::new(truncated, None)).unwrap_err();
        assert!(matches!(err, DiscoveryError::Xml { .. }));
        assert!(err.to_string().contains("<scenario>"));
    }

    #[test]
    fn apply_vector_rewrites_values_and_keeps_alignment() {
        let desc = description(Some("7"));
        let rewritten = apply_vector(&desc, &[7.5, 12.25, 1.5]).unwrap();
        assert!(rewritten.contains(r#"<absolute_v value="7.5" fuzz="true"/>"#));
        assert!(rewritten.contains(r#"<relative_p value="12.25" mutable="yes"/>"#));
        assert!(rewritten.contains(r#"<direction value="right"/>"#));
        assert!(rewritten.contains(r#"<v_ego value="8.0" fuzz="true"/>"#));

        let again = discover(&ScenarioDescription::new(rewritten, Some("7".to_string()))).unwrap();
        let values: Vec<f64> = again.parameters.iter().map(|p| p.current_value).collect();
        assert_eq!(values, vec![7.5, 12.25, 1.5]);
    }

    #[test]
    fn apply_vector_rejects_length_mismatch() {
        let err = apply_vector(&description(Some("7")), &[1.0]).unwrap_err();
        assert_eq!(
            err,
            DiscoveryError::VectorLength {
                expected: 3,
                actual: 1
            }
        );
    }
}
