#[cfg(test)]
macro_rules! dn {
    ($s:expr) => {{
        $crate::testkit::dn($s)
    }};
}

#[cfg(test)]
macro_rules! rdn {
    ($t:expr, $v:expr) => {{
        dsad_proto::dn::Rdn::single($t, $v)
    }};
}

#[cfg(test)]
macro_rules! assert_name_error {
    ($result:expr, $problem:expr, $matched:expr) => {{
        match $result {
            Err(dsad_proto::internal::OperationError::Name { problem, matched }) => {
                assert_eq!(problem, $problem);
                assert_eq!(matched, dn!($matched));
            }
            other => panic!("expected a name error, got {:?}", other),
        }
    }};
}
