/// Builds a header map, skipping entries whose value is `None`.
macro_rules! headers {
    ( $( ($key:expr, $val:expr) ),* $(,)? ) => {{
        let mut h = std::collections::HashMap::<String, String>::new();
        trait AsHeader {
            fn as_header(&self) -> Option<String>;
        }
        impl AsHeader for &str {
            fn as_header(&self) -> Option<String> { Some(self.to_string()) }
        }

        impl AsHeader for Option<String> {
            fn as_header(&self) -> Option<String> { self.clone() }
        }

        impl AsHeader for Option<&str> {
            fn as_header(&self) -> Option<String> { self.map(|x| x.to_string()) }
        }

        impl AsHeader for String {
            fn as_header(&self) -> Option<String> { Some(self.clone()) }
        }

        impl AsHeader for &String {
            fn as_header(&self) -> Option<String> { Some(self.to_string()) }
        }
        $(
            if let Some(s) = AsHeader::as_header(&$val) {
                h.insert($key.to_string(), s);
            }
        )*
        h
    }};
}

pub(crate) use headers;
