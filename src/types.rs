/// Scalar types rendered inline instead of as named schemas.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum BuiltInType {
    Uuid,
    MultipartFile,
    LocalDateTime,
    String,
    Integer,
    Long,
    Double,
    Float,
    Byte,
    Char,
    Short,
    Boolean,
}

impl BuiltInType {
    /// Built-in type for a field or parameter descriptor; boxed and primitive forms
    /// map to the same type.
    pub(crate) fn from_descriptor(descriptor: &str) -> Option<Self> {
        Some(match descriptor {
            "Ljava/util/UUID;" => BuiltInType::Uuid,
            "Lorg/springframework/web/multipart/MultipartFile;" => BuiltInType::MultipartFile,
            "Ljava/time/LocalDateTime;" => BuiltInType::LocalDateTime,
            "Ljava/lang/String;" => BuiltInType::String,
            "I" | "Ljava/lang/Integer;" => BuiltInType::Integer,
            "J" | "Ljava/lang/Long;" => BuiltInType::Long,
            "D" | "Ljava/lang/Double;" => BuiltInType::Double,
            "F" | "Ljava/lang/Float;" => BuiltInType::Float,
            "B" | "Ljava/lang/Byte;" => BuiltInType::Byte,
            "C" | "Ljava/lang/Character;" => BuiltInType::Char,
            "S" | "Ljava/lang/Short;" => BuiltInType::Short,
            "Z" | "Ljava/lang/Boolean;" => BuiltInType::Boolean,
            _ => return None,
        })
    }

    pub(crate) fn from_class_name(name: &str) -> Option<Self> {
        Self::from_descriptor(&format!("L{name};"))
    }

    /// OpenAPI `type` and optional `format`.
    pub(crate) fn type_and_format(self) -> (&'static str, Option<&'static str>) {
        match self {
            BuiltInType::Uuid => ("string", Some("uuid")),
            BuiltInType::LocalDateTime => ("string", Some("date-time")),
            BuiltInType::MultipartFile => ("string", Some("binary")),
            BuiltInType::String | BuiltInType::Char => ("string", None),
            BuiltInType::Byte | BuiltInType::Integer | BuiltInType::Short => {
                ("integer", Some("int32"))
            }
            BuiltInType::Long => ("integer", Some("int64")),
            BuiltInType::Float => ("number", Some("float")),
            BuiltInType::Double => ("number", Some("double")),
            BuiltInType::Boolean => ("boolean", None),
        }
    }
}

/// Element-carrying containers rendered as arrays.
pub(crate) fn is_collection(name: &str) -> bool {
    matches!(
        name,
        "java/util/List" | "java/util/Collection" | "java/util/Set"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_and_boxed_forms_share_a_type() {
        assert_eq!(Some(BuiltInType::Long), BuiltInType::from_descriptor("J"));
        assert_eq!(
            Some(BuiltInType::Long),
            BuiltInType::from_descriptor("Ljava/lang/Long;")
        );
        assert_eq!(None, BuiltInType::from_descriptor("Ljava/util/List;"));
    }

    #[test]
    fn formats_follow_openapi_conventions() {
        assert_eq!(("integer", Some("int32")), BuiltInType::Short.type_and_format());
        assert_eq!(("string", None), BuiltInType::Char.type_and_format());
        assert_eq!(
            ("string", Some("binary")),
            BuiltInType::MultipartFile.type_and_format()
        );
        assert_eq!(
            Some(BuiltInType::Uuid),
            BuiltInType::from_class_name("java/util/UUID")
        );
    }
}
