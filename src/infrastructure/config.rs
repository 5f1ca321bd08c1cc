use crate::domain::policy::{CalendarPolicy, HolidayRange, MealWindow, WorkWindow};
use crate::domain::templates::{BlockTemplate, TemplateBook};
use crate::infrastructure::error::InfraError;
use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const POLICIES_JSON: &str = "policies.json";
const TEMPLATES_JSON: &str = "templates.json";
const CLOCK_FORMAT: &str = "%H:%M";

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub policies: serde_json::Value,
    pub templates: serde_json::Value,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "DayPlanner",
                "timezone": "UTC"
            }),
        ),
        (POLICIES_JSON, policy_to_json(&CalendarPolicy::default())),
        (
            TEMPLATES_JSON,
            serde_json::json!({
                "schema": 1,
                "templates": []
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        policies: read_config(&config_dir.join(POLICIES_JSON))?,
        templates: read_config(&config_dir.join(TEMPLATES_JSON))?,
    })
}

pub fn read_timezone(config_dir: &Path) -> Result<Option<String>, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(app
        .get("timezone")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned))
}

/// Overlays `policies.json` onto the defaults; malformed fields keep their default.
pub fn load_policy(config_dir: &Path) -> Result<CalendarPolicy, InfraError> {
    let mut policy = CalendarPolicy::default();
    let parsed = read_config(&config_dir.join(POLICIES_JSON))?;

    if let Some(timezone) = read_timezone(config_dir)?.and_then(|name| name.parse::<Tz>().ok()) {
        policy.timezone = timezone;
    }
    if let Some(window) = parsed.get("weekday").and_then(parse_work_window) {
        policy.weekday = window;
    }
    if let Some(window) = parsed.get("weekend").and_then(parse_work_window) {
        policy.weekend = window;
    }
    if let Some(meals) = parsed.get("meals").and_then(serde_json::Value::as_array) {
        policy.meal_windows = meals.iter().filter_map(parse_meal_window).collect();
    }
    if let Some(value) = read_minutes(&parsed, "mealDurationMinutes") {
        policy.meal_duration_minutes = value;
    }
    if let Some(value) = read_minutes(&parsed, "breakDurationMinutes") {
        policy.break_duration_minutes = value;
    }
    if let Some(value) = read_minutes(&parsed, "breakIntervalMinutes") {
        policy.break_interval_minutes = value;
    }
    if let Some(holidays) = parsed.get("holidays").and_then(serde_json::Value::as_array) {
        policy.holidays = holidays.iter().filter_map(parse_holiday).collect();
    }
    if let Some(value) = parsed.get("historyDays").and_then(serde_json::Value::as_u64) {
        policy.history_days = u32::try_from(value).unwrap_or(policy.history_days);
    }

    Ok(policy)
}

pub fn save_policy(config_dir: &Path, policy: &CalendarPolicy) -> Result<(), InfraError> {
    write_config(&config_dir.join(POLICIES_JSON), &policy_to_json(policy))?;

    let path = config_dir.join(APP_JSON);
    let mut app = read_config(&path)?;
    let object = app.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert(
        "timezone".to_string(),
        serde_json::Value::String(policy.timezone.name().to_string()),
    );
    write_config(&path, &app)
}

pub fn load_templates(config_dir: &Path) -> Result<TemplateBook, InfraError> {
    let parsed = read_config(&config_dir.join(TEMPLATES_JSON))?;
    let templates = match parsed.get("templates") {
        Some(value) => serde_json::from_value::<Vec<BlockTemplate>>(value.clone())?,
        None => Vec::new(),
    };
    if let Some(error) = templates.iter().find_map(|template| template.validate().err()) {
        return Err(InfraError::InvalidConfig(format!("{TEMPLATES_JSON}: {error}")));
    }
    Ok(TemplateBook::new(templates))
}

pub fn save_templates(config_dir: &Path, book: &TemplateBook) -> Result<(), InfraError> {
    let value = serde_json::json!({
        "schema": 1,
        "templates": book.templates(),
    });
    write_config(&config_dir.join(TEMPLATES_JSON), &value)
}

fn policy_to_json(policy: &CalendarPolicy) -> serde_json::Value {
    let window = |window: &WorkWindow| {
        serde_json::json!({
            "start": window.start.format(CLOCK_FORMAT).to_string(),
            "end": window.end.format(CLOCK_FORMAT).to_string(),
        })
    };
    serde_json::json!({
        "schema": 1,
        "weekday": window(&policy.weekday),
        "weekend": window(&policy.weekend),
        "meals": policy
            .meal_windows
            .iter()
            .map(|meal| serde_json::json!({
                "name": meal.name,
                "start": meal.start.format(CLOCK_FORMAT).to_string(),
                "end": meal.end.format(CLOCK_FORMAT).to_string(),
            }))
            .collect::<Vec<_>>(),
        "mealDurationMinutes": policy.meal_duration_minutes,
        "breakDurationMinutes": policy.break_duration_minutes,
        "breakIntervalMinutes": policy.break_interval_minutes,
        "holidays": policy
            .holidays
            .iter()
            .map(|range| serde_json::json!({
                "start": range.start.to_string(),
                "end": range.end.to_string(),
            }))
            .collect::<Vec<_>>(),
        "historyDays": policy.history_days,
    })
}

fn parse_clock(value: Option<&serde_json::Value>) -> Option<NaiveTime> {
    let raw = value.and_then(serde_json::Value::as_str)?;
    NaiveTime::parse_from_str(raw.trim(), CLOCK_FORMAT).ok()
}

fn parse_work_window(value: &serde_json::Value) -> Option<WorkWindow> {
    Some(WorkWindow::new(
        parse_clock(value.get("start"))?,
        parse_clock(value.get("end"))?,
    ))
}

fn parse_meal_window(value: &serde_json::Value) -> Option<MealWindow> {
    let name = value
        .get("name")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())?;
    Some(MealWindow::new(
        name,
        parse_clock(value.get("start"))?,
        parse_clock(value.get("end"))?,
    ))
}

fn parse_holiday(value: &serde_json::Value) -> Option<HolidayRange> {
    let date = |key: &str| {
        value
            .get(key)
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok())
    };
    let start = date("start")?;
    let end = date("end")?;
    (end >= start).then_some(HolidayRange { start, end })
}

fn read_minutes(parsed: &serde_json::Value, key: &str) -> Option<u32> {
    parsed
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .filter(|value| *value > 0)
        .and_then(|value| u32::try_from(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Priority;
    use crate::domain::policy::clock;
    use crate::domain::templates::TemplateKind;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_TEMP_DIR: AtomicU64 = AtomicU64::new(1);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DIR.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "dayplanner-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp config dir");
            ensure_default_configs(&path).expect("write default configs");
            Self { path }
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn defaults_load_back_as_default_policy() {
        let dir = TempConfigDir::new();
        let bundle = load_configs(&dir.path).expect("load configs");
        assert_eq!(bundle.app["appName"], "DayPlanner");
        assert_eq!(
            load_policy(&dir.path).expect("load policy"),
            CalendarPolicy::default()
        );
        assert!(load_templates(&dir.path)
            .expect("load templates")
            .templates()
            .is_empty());
    }

    #[test]
    fn save_policy_roundtrips_timezone_and_holidays() {
        let dir = TempConfigDir::new();
        let mut policy = CalendarPolicy {
            timezone: chrono_tz::Europe::Berlin,
            weekend: WorkWindow::new(clock(10, 0), clock(20, 0)),
            break_interval_minutes: 120,
            ..CalendarPolicy::default()
        };
        policy
            .add_holiday(
                NaiveDate::from_ymd_opt(2026, 4, 1).expect("date"),
                NaiveDate::from_ymd_opt(2026, 4, 3).expect("date"),
            )
            .expect("holiday");

        save_policy(&dir.path, &policy).expect("save policy");
        assert_eq!(
            read_timezone(&dir.path).expect("timezone").as_deref(),
            Some("Europe/Berlin")
        );
        assert_eq!(load_policy(&dir.path).expect("reload policy"), policy);
    }

    #[test]
    fn malformed_fields_fall_back_to_defaults() {
        let dir = TempConfigDir::new();
        fs::write(
            dir.path.join(POLICIES_JSON),
            r#"{"schema":1,"weekday":{"start":"late","end":"22:00"},"mealDurationMinutes":0,"breakIntervalMinutes":60,"holidays":[{"start":"2026-05-02","end":"2026-05-01"}]}"#,
        )
        .expect("write policies");

        let policy = load_policy(&dir.path).expect("load policy");
        let defaults = CalendarPolicy::default();
        assert_eq!(policy.weekday, defaults.weekday);
        assert_eq!(policy.meal_duration_minutes, defaults.meal_duration_minutes);
        assert_eq!(policy.break_interval_minutes, 60);
        assert!(policy.holidays.is_empty());
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = TempConfigDir::new();
        fs::write(dir.path.join(POLICIES_JSON), r#"{"schema":2}"#).expect("write policies");
        assert!(matches!(
            load_policy(&dir.path),
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn templates_roundtrip_through_config_file() {
        let dir = TempConfigDir::new();
        let mut book = TemplateBook::default();
        book.add(BlockTemplate {
            name: "Gym".to_string(),
            kind: TemplateKind::FixedEvent,
            duration_minutes: 60,
            location: Some("Campus".to_string()),
            notes: None,
            colour: None,
            priority: Priority::High,
            repeat_interval_days: Some(2),
        })
        .expect("add template");

        save_templates(&dir.path, &book).expect("save templates");
        assert_eq!(load_templates(&dir.path).expect("load templates"), book);
    }
}
