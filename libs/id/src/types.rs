//! Typed identifier definitions.

use crate::define_uuid;

define_uuid!(NodeUuid, "node");
define_uuid!(AppUuid, "application");
define_uuid!(RevisionId, "revision");
