//! Time Functions
//!
//! A [`TimeFunction`] decides which timestamp a record is windowed by: a value
//! read from one of its columns (event time) or the creation timestamp of the
//! buffer that delivered it (ingestion time).
//!
//! Functions are bound once per batch to a [`TimeColumn`], which then reads
//! per-row timestamps without further schema lookups.

use std::fmt;
use std::str::FromStr;

use arrow_array::{
    Array, Int64Array, RecordBatch, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray,
};
use arrow_schema::{DataType, Schema, TimeUnit};

/// How a time column encodes its values. Every format is normalized to
/// milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    /// `Int64` milliseconds since the epoch
    #[default]
    UnixMillis,
    /// `Int64` seconds since the epoch
    UnixSeconds,
    /// `Int64` microseconds since the epoch
    UnixMicros,
    /// `Int64` nanoseconds since the epoch
    UnixNanos,
    /// Arrow `Timestamp` column, unit taken from the data type
    ArrowNative,
}

impl TimestampFormat {
    /// Canonical name, as accepted by [`FromStr`].
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::UnixMillis => "UnixMillis",
            Self::UnixSeconds => "UnixSeconds",
            Self::UnixMicros => "UnixMicros",
            Self::UnixNanos => "UnixNanos",
            Self::ArrowNative => "ArrowNative",
        }
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TimestampFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unixmillis" | "millis" | "ms" => Ok(Self::UnixMillis),
            "unixseconds" | "seconds" | "s" => Ok(Self::UnixSeconds),
            "unixmicros" | "micros" | "us" => Ok(Self::UnixMicros),
            "unixnanos" | "nanos" | "ns" => Ok(Self::UnixNanos),
            "arrownative" | "native" => Ok(Self::ArrowNative),
            other => Err(format!("unsupported timestamp format '{other}'")),
        }
    }
}

/// Failure to read a timestamp from a batch.
#[derive(Debug, thiserror::Error)]
pub enum EventTimeError {
    /// The schema has no column with this name
    #[error("time column '{0}' is missing from the schema")]
    ColumnNotFound(String),

    /// The column's data type does not match the requested format
    #[error("time column cannot be read as {format}: wanted {expected}, got {found}")]
    IncompatibleType {
        /// Format the column was bound with
        format: TimestampFormat,
        /// Data type the format requires
        expected: String,
        /// Data type of the column
        found: String,
    },

    /// A row carries no timestamp
    #[error("row {row} has a null timestamp")]
    NullTimestamp {
        /// Offending row
        row: usize,
    },
}

/// Selects the timestamp used to window a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeFunction {
    /// Read the timestamp from a column of the record
    EventTime {
        /// Column name
        column: String,
        /// How the column encodes time
        format: TimestampFormat,
    },
    /// Use the creation timestamp of the buffer carrying the record
    IngestionTime,
}

impl TimeFunction {
    /// Event time read from a millisecond column.
    #[must_use]
    pub fn event_time(column: &str) -> Self {
        Self::EventTime {
            column: column.to_string(),
            format: TimestampFormat::UnixMillis,
        }
    }

    /// Event time read from a column with an explicit format.
    #[must_use]
    pub fn event_time_with_format(column: &str, format: TimestampFormat) -> Self {
        Self::EventTime {
            column: column.to_string(),
            format,
        }
    }

    /// Checks that the function can read records of `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`EventTimeError`] if the column is missing or its type does not
    /// match the format.
    pub fn validate(&self, schema: &Schema) -> Result<(), EventTimeError> {
        match self {
            Self::IngestionTime => Ok(()),
            Self::EventTime { column, format } => {
                let index = schema
                    .index_of(column)
                    .map_err(|_| EventTimeError::ColumnNotFound(column.clone()))?;
                validate_type(*format, schema.field(index).data_type())
            }
        }
    }

    /// Binds the function to one batch.
    ///
    /// # Errors
    ///
    /// Returns [`EventTimeError`] if the batch lacks the column or the column
    /// type does not match the format.
    pub fn bind<'a>(
        &self,
        batch: &'a RecordBatch,
        creation_timestamp: i64,
    ) -> Result<TimeColumn<'a>, EventTimeError> {
        let (column, format) = match self {
            Self::IngestionTime => return Ok(TimeColumn::Ingestion(creation_timestamp)),
            Self::EventTime { column, format } => (column, *format),
        };

        let index = batch
            .schema_ref()
            .index_of(column)
            .map_err(|_| EventTimeError::ColumnNotFound(column.clone()))?;
        let array = batch.column(index);
        validate_type(format, array.data_type())?;

        let bound = match (format, array.data_type()) {
            (TimestampFormat::ArrowNative, DataType::Timestamp(TimeUnit::Second, _)) => {
                array
                    .as_any()
                    .downcast_ref::<TimestampSecondArray>()
                    .map(TimeColumn::Seconds)
            }
            (TimestampFormat::ArrowNative, DataType::Timestamp(TimeUnit::Millisecond, _)) => {
                array
                    .as_any()
                    .downcast_ref::<TimestampMillisecondArray>()
                    .map(TimeColumn::Millis)
            }
            (TimestampFormat::ArrowNative, DataType::Timestamp(TimeUnit::Microsecond, _)) => {
                array
                    .as_any()
                    .downcast_ref::<TimestampMicrosecondArray>()
                    .map(TimeColumn::Micros)
            }
            (TimestampFormat::ArrowNative, DataType::Timestamp(TimeUnit::Nanosecond, _)) => {
                array
                    .as_any()
                    .downcast_ref::<TimestampNanosecondArray>()
                    .map(TimeColumn::Nanos)
            }
            (_, _) => array
                .as_any()
                .downcast_ref::<Int64Array>()
                .map(|values| TimeColumn::Int64 { values, format }),
        };

        bound.ok_or_else(|| EventTimeError::IncompatibleType {
            format,
            expected: expected_type(format).to_string(),
            found: format!("{:?}", array.data_type()),
        })
    }
}

impl fmt::Display for TimeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventTime { column, format } => write!(f, "EventTime({column}, {format})"),
            Self::IngestionTime => write!(f, "IngestionTime"),
        }
    }
}

/// A [`TimeFunction`] bound to one batch.
#[derive(Debug, Clone, Copy)]
pub enum TimeColumn<'a> {
    /// Every row carries the buffer creation timestamp
    Ingestion(i64),
    /// Integer column with a unix format
    Int64 {
        /// Column values
        values: &'a Int64Array,
        /// Unit of the values
        format: TimestampFormat,
    },
    /// Arrow timestamp in seconds
    Seconds(&'a TimestampSecondArray),
    /// Arrow timestamp in milliseconds
    Millis(&'a TimestampMillisecondArray),
    /// Arrow timestamp in microseconds
    Micros(&'a TimestampMicrosecondArray),
    /// Arrow timestamp in nanoseconds
    Nanos(&'a TimestampNanosecondArray),
}

impl TimeColumn<'_> {
    /// Returns the timestamp of `row` in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`EventTimeError::NullTimestamp`] if the value is null.
    pub fn timestamp(&self, row: usize) -> Result<i64, EventTimeError> {
        let (is_null, raw, unit) = match self {
            Self::Ingestion(ts) => return Ok(*ts),
            Self::Int64 { values, format } => (values.is_null(row), values.value(row), *format),
            Self::Seconds(values) => (
                values.is_null(row),
                values.value(row),
                TimestampFormat::UnixSeconds,
            ),
            Self::Millis(values) => (
                values.is_null(row),
                values.value(row),
                TimestampFormat::UnixMillis,
            ),
            Self::Micros(values) => (
                values.is_null(row),
                values.value(row),
                TimestampFormat::UnixMicros,
            ),
            Self::Nanos(values) => (
                values.is_null(row),
                values.value(row),
                TimestampFormat::UnixNanos,
            ),
        };
        if is_null {
            return Err(EventTimeError::NullTimestamp { row });
        }
        Ok(to_millis(raw, unit))
    }
}

fn to_millis(raw: i64, unit: TimestampFormat) -> i64 {
    match unit {
        TimestampFormat::UnixMillis | TimestampFormat::ArrowNative => raw,
        TimestampFormat::UnixSeconds => raw.saturating_mul(1000),
        TimestampFormat::UnixMicros => raw.div_euclid(1000),
        TimestampFormat::UnixNanos => raw.div_euclid(1_000_000),
    }
}

fn expected_type(format: TimestampFormat) -> &'static str {
    match format {
        TimestampFormat::ArrowNative => "Timestamp",
        _ => "Int64",
    }
}

fn validate_type(format: TimestampFormat, data_type: &DataType) -> Result<(), EventTimeError> {
    let compatible = match format {
        TimestampFormat::ArrowNative => matches!(data_type, DataType::Timestamp(_, _)),
        _ => matches!(data_type, DataType::Int64),
    };
    if compatible {
        Ok(())
    } else {
        Err(EventTimeError::IncompatibleType {
            format,
            expected: expected_type(format).to_string(),
            found: format!("{data_type:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::StringArray;
    use arrow_schema::Field;
    use std::sync::Arc;

    fn batch_with(name: &str, array: Arc<dyn Array>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(
            name,
            array.data_type().clone(),
            true,
        )]));
        RecordBatch::try_new(schema, vec![array]).unwrap()
    }

    #[test]
    fn test_event_time_millis() {
        let batch = batch_with("ts", Arc::new(Int64Array::from(vec![100, 2500])));
        let column = TimeFunction::event_time("ts").bind(&batch, 0).unwrap();
        assert_eq!(column.timestamp(0).unwrap(), 100);
        assert_eq!(column.timestamp(1).unwrap(), 2500);
    }

    #[test]
    fn test_event_time_seconds_and_nanos() {
        let batch = batch_with("ts", Arc::new(Int64Array::from(vec![3])));
        let seconds = TimeFunction::event_time_with_format("ts", TimestampFormat::UnixSeconds);
        assert_eq!(seconds.bind(&batch, 0).unwrap().timestamp(0).unwrap(), 3000);

        let batch = batch_with("ts", Arc::new(Int64Array::from(vec![-1_500_000])));
        let nanos = TimeFunction::event_time_with_format("ts", TimestampFormat::UnixNanos);
        assert_eq!(nanos.bind(&batch, 0).unwrap().timestamp(0).unwrap(), -2);
    }

    #[test]
    fn test_arrow_native_micros() {
        let batch = batch_with(
            "ts",
            Arc::new(TimestampMicrosecondArray::from(vec![5_000_000])),
        );
        let function = TimeFunction::event_time_with_format("ts", TimestampFormat::ArrowNative);
        assert_eq!(function.bind(&batch, 0).unwrap().timestamp(0).unwrap(), 5000);
    }

    #[test]
    fn test_ingestion_time_ignores_columns() {
        let batch = batch_with("ts", Arc::new(Int64Array::from(vec![1, 2, 3])));
        let column = TimeFunction::IngestionTime.bind(&batch, 42).unwrap();
        assert_eq!(column.timestamp(2).unwrap(), 42);
    }

    #[test]
    fn test_null_timestamp() {
        let batch = batch_with("ts", Arc::new(Int64Array::from(vec![Some(1), None])));
        let column = TimeFunction::event_time("ts").bind(&batch, 0).unwrap();
        assert!(matches!(
            column.timestamp(1),
            Err(EventTimeError::NullTimestamp { row: 1 })
        ));
    }

    #[test]
    fn test_missing_and_incompatible_column() {
        let batch = batch_with("name", Arc::new(StringArray::from(vec!["a"])));
        assert!(matches!(
            TimeFunction::event_time("ts").bind(&batch, 0),
            Err(EventTimeError::ColumnNotFound(_))
        ));
        assert!(matches!(
            TimeFunction::event_time("name").validate(batch.schema_ref()),
            Err(EventTimeError::IncompatibleType { .. })
        ));
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(
            "millis".parse::<TimestampFormat>().unwrap(),
            TimestampFormat::UnixMillis
        );
        assert_eq!(
            "ArrowNative".parse::<TimestampFormat>().unwrap(),
            TimestampFormat::ArrowNative
        );
        assert!("fortnights".parse::<TimestampFormat>().is_err());
    }
}
