use thiserror::Error;

/// How a failed recognize call should be treated by a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    /// No face in the still. The user should reposition or fix lighting.
    NoFace,
    /// A face was found but matched nobody. Expected while polling.
    NotRecognized,
    Other,
}

impl RecognitionErrorKind {
    /// Classify a service failure.
    ///
    /// A structured `code` wins when present. Services that only send a
    /// message are classified by the substrings "No face detected" and
    /// "not recognized".
    pub fn classify(code: Option<&str>, message: &str) -> Self {
        match code {
            Some("no_face") => return Self::NoFace,
            Some("not_recognized") => return Self::NotRecognized,
            _ => {}
        }
        if message.contains("No face detected") {
            Self::NoFace
        } else if message.contains("not recognized") {
            Self::NotRecognized
        } else {
            Self::Other
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// The service rejected a registration.
    #[error("{0}")]
    Registration(String),
    /// The service rejected a recognize call.
    #[error("{message}")]
    Recognition {
        kind: RecognitionErrorKind,
        message: String,
    },
    /// Non-2xx from a list or mark endpoint.
    #[error("{0}")]
    Request(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
}

impl ApiError {
    /// Recognition kind for errors from `recognize`. Transport failures
    /// during a recognize call count as `Other`.
    pub fn recognition_kind(&self) -> RecognitionErrorKind {
        match self {
            ApiError::Recognition { kind, .. } => *kind,
            _ => RecognitionErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_message() {
        assert_eq!(
            RecognitionErrorKind::classify(None, "No face detected in image"),
            RecognitionErrorKind::NoFace
        );
        assert_eq!(
            RecognitionErrorKind::classify(None, "Face not recognized"),
            RecognitionErrorKind::NotRecognized
        );
        assert_eq!(
            RecognitionErrorKind::classify(None, "No students registered in this class"),
            RecognitionErrorKind::Other
        );
    }

    #[test]
    fn test_structured_code_wins() {
        assert_eq!(
            RecognitionErrorKind::classify(Some("not_recognized"), "No face detected"),
            RecognitionErrorKind::NotRecognized
        );
        assert_eq!(
            RecognitionErrorKind::classify(Some("no_face"), "something else"),
            RecognitionErrorKind::NoFace
        );
        // Unknown codes fall back to the message.
        assert_eq!(
            RecognitionErrorKind::classify(Some("db_locked"), "Face not recognized"),
            RecognitionErrorKind::NotRecognized
        );
    }

    #[test]
    fn test_non_recognition_errors_are_other() {
        let err = ApiError::Request("Failed to fetch students".into());
        assert_eq!(err.recognition_kind(), RecognitionErrorKind::Other);
        assert_eq!(err.to_string(), "Failed to fetch students");
    }
}
