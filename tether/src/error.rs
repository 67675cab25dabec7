use std::fmt;

/// A foreign error read off the exception slate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignException {
    /// foreign type name of the exception object, e.g. `BoundsError`
    pub type_name: String,
    pub message: String,
}

impl fmt::Display for ForeignException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            return f.write_str(&self.type_name);
        }
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl std::error::Error for ForeignException {}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A typed view was constructed over a value of the wrong foreign type.
    #[error("type assertion failed: expected {expected}, found {found}")]
    TypeAssertion { expected: String, found: String },

    /// Host-side bounds check, raised before any foreign call.
    #[error("{}", describe_out_of_range(.index, .axis, .length))]
    IndexOutOfRange {
        index: usize,
        axis: Option<usize>,
        length: usize,
    },

    #[error("cannot unbox a value of foreign type {found} as {target}")]
    Unboxing { target: String, found: String },

    #[error("foreign exception: {0}")]
    ForeignRuntime(#[from] ForeignException),

    #[error("usertype {name} was used before being materialized")]
    NotInitialized { name: String },

    #[error("usertype {name} is already materialized and cannot be changed")]
    AlreadyFinalized { name: String },

    /// `Some(inner)` where `inner` itself boxes to `nothing`.
    #[error("Some value of type {target} boxes to nothing and would unbox as None")]
    AmbiguousNothing { target: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn unboxing(target: impl Into<String>, found: impl Into<String>) -> Self {
        Self::Unboxing {
            target: target.into(),
            found: found.into(),
        }
    }

    /// `true` if this error came off the foreign exception slate
    pub fn is_foreign(&self) -> bool {
        matches!(self, Self::ForeignRuntime(_))
    }
}

fn describe_out_of_range(index: &usize, axis: &Option<usize>, length: &usize) -> String {
    match *axis {
        None => format!("0-based index {index} out of range for array of length {length}"),
        Some(axis) => format!(
            "0-based index {index} out of range for array of length {length} along {}",
            axis_name(axis)
        ),
    }
}

fn axis_name(axis: usize) -> String {
    match axis {
        0 => "1st dimension".to_string(),
        1 => "2nd dimension".to_string(),
        2 => "3rd dimension".to_string(),
        3..=9 => format!("{}th dimension", axis + 1),
        _ => format!("dimension {axis}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_names_the_axis() {
        let err = Error::IndexOutOfRange {
            index: 5,
            axis: Some(0),
            length: 2,
        };
        assert_eq!(
            err.to_string(),
            "0-based index 5 out of range for array of length 2 along 1st dimension"
        );

        let err = Error::IndexOutOfRange {
            index: 9,
            axis: Some(4),
            length: 3,
        };
        assert!(err.to_string().ends_with("along 5th dimension"));
    }

    #[test]
    fn linear_out_of_range_has_no_axis() {
        let err = Error::IndexOutOfRange {
            index: 3,
            axis: None,
            length: 3,
        };
        assert_eq!(err.to_string(), "0-based index 3 out of range for array of length 3");
    }

    #[test]
    fn foreign_exceptions_convert() {
        let err: Error = ForeignException {
            type_name: "BoundsError".into(),
            message: "attempt to access index 4".into(),
        }
        .into();
        assert!(err.is_foreign());
        assert_eq!(
            err.to_string(),
            "foreign exception: BoundsError: attempt to access index 4"
        );
    }
}
