use std::{fmt, time::SystemTime};

use serde_json::{Map, Value};
use tracing::{
    Event, Subscriber,
    field::{Field, Visit},
    span,
};
use tracing_subscriber::{
    Layer,
    fmt::{FmtContext, FormatEvent, FormatFields, format::Writer},
    layer::Context,
    registry::LookupSpan,
};

pub const TASK_ID_FIELD: &str = "task_id";
pub const TASK_KIND_FIELD: &str = "kind";

/// The background task a span runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskScope {
    pub task_id: String,
    pub kind: Option<String>,
}

impl TaskScope {
    fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        let task_id = fields.get(TASK_ID_FIELD)?.as_str()?.to_string();
        let kind = fields
            .get(TASK_KIND_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self { task_id, kind })
    }
}

/// Attaches a [`TaskScope`] to every span opened under a span carrying `task_id`, so events
/// emitted deep inside a builder or a raster routine are still attributed to their task.
#[derive(Debug, Default)]
pub struct TaskIdLayer;

impl TaskIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TaskIdLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut fields = Map::new();
        attrs.record(&mut FieldCollector(&mut fields));

        let scope = TaskScope::from_fields(&fields).or_else(|| {
            span.parent()
                .and_then(|parent| parent.extensions().get::<TaskScope>().cloned())
        });
        if let Some(scope) = scope {
            span.extensions_mut().replace(scope);
        }
    }
}

/// One JSON object per event. The task scope, when there is one, sits at the top level next to
/// the timestamp and the level, and the event's own fields are nested under `fields`.
#[derive(Debug, Default)]
pub struct TaskIdJsonFormat;

impl<S, N> FormatEvent<S, N> for TaskIdJsonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let mut fields = Map::new();
        event.record(&mut FieldCollector(&mut fields));

        let mut line = Map::new();
        line.insert(
            "timestamp".to_string(),
            humantime::format_rfc3339_millis(SystemTime::now())
                .to_string()
                .into(),
        );
        line.insert("level".to_string(), meta.level().to_string().into());
        line.insert("target".to_string(), meta.target().into());

        if let Some(scope) = current_scope(ctx) {
            line.insert(TASK_ID_FIELD.to_string(), scope.task_id.into());
            if let Some(kind) = scope.kind {
                line.insert("task_kind".to_string(), kind.into());
            }
        }
        if let Some(message) = fields.remove("message") {
            line.insert("message".to_string(), message);
        }
        if !fields.is_empty() {
            line.insert("fields".to_string(), Value::Object(fields));
        }

        let json = serde_json::to_string(&line).map_err(|_| fmt::Error)?;
        writeln!(writer, "{json}")
    }
}

fn current_scope<S, N>(ctx: &FmtContext<'_, S, N>) -> Option<TaskScope>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    ctx.event_scope()?
        .find_map(|span| span.extensions().get::<TaskScope>().cloned())
}

/// Records fields as JSON values, keeping numbers and booleans typed.
struct FieldCollector<'a>(&'a mut Map<String, Value>);

impl FieldCollector<'_> {
    fn insert(&mut self, field: &Field, value: Value) {
        self.0.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldCollector<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{value:?}").into());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }
}
