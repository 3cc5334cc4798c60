extern crate anyhow;
extern crate reqwest;
extern crate std;

pub type DashResult<T> = std::result::Result<T, DashError>;

#[derive(Debug)]
pub enum DashError {
    HttpError(reqwest::Error),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
    XmlError(xml::reader::Error),
    AnnotatedError(anyhow::Error),
    GenericError(String),
}

pub fn make_error(msg: &str) -> DashError {
    return DashError::GenericError(msg.to_string());
}

impl std::fmt::Display for DashError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            DashError::HttpError(ref err) => {
                return write!(f, "HTTP Error: {}", err);
            },
            DashError::IoError(ref err) => {
                return write!(f, "IO Error: {}", err);
            },
            DashError::JsonError(ref err) => {
                return write!(f, "JSON Error: {}", err);
            },
            DashError::XmlError(ref err) => {
                return write!(f, "XML Error: {}", err);
            },
            DashError::AnnotatedError(ref err) => {
                return write!(f, "Error: {:#}", err);
            },
            DashError::GenericError(ref msg) => {
                return write!(f, "Error: {}", msg);
            },
        }
    }
}

impl std::error::Error for DashError {
    fn cause(&self) -> Option<&dyn std::error::Error> {
        return None
    }
}

impl From<reqwest::Error> for DashError {
    fn from(err: reqwest::Error) -> DashError {
        return DashError::HttpError(err);
    }
}

impl From<std::io::Error> for DashError {
    fn from(err: std::io::Error) -> DashError {
        return DashError::IoError(err);
    }
}

impl From<serde_json::Error> for DashError {
    fn from(err: serde_json::Error) -> DashError {
        return DashError::JsonError(err);
    }
}

impl From<xml::reader::Error> for DashError {
    fn from(err: xml::reader::Error) -> DashError {
        return DashError::XmlError(err);
    }
}

impl From<anyhow::Error> for DashError {
    fn from(err: anyhow::Error) -> DashError {
        return DashError::AnnotatedError(err);
    }
}
