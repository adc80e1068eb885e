mod sftp_client;
mod test_utils;
